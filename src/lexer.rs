use self::Token::*;
use anyhow::Result;
use std::{iter::Peekable, str::Chars};

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Assign,
    Asterisk,
    Bang,
    Colon,
    Comma,
    Else,
    EndOfFile,
    Equal,
    False,
    Function,
    GreaterThan,
    Identifier(String),
    If,
    Illegal(String),
    Integer(i64),
    LeftBrace,
    LeftBracket,
    LeftParentheses,
    LessThan,
    Let,
    Minus,
    NotEqual,
    Plus,
    Return,
    RightBrace,
    RightBracket,
    RightParentheses,
    Semicolon,
    Slash,
    StringLiteral(String),
    True,
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Self {
            chars: input.chars().peekable(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == EndOfFile;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        while self.chars.next_if(|c| c.is_ascii_whitespace()).is_some() {}
        let first_char = match self.chars.next() {
            Some(c) => c,
            None => return Ok(EndOfFile),
        };
        let token = match first_char {
            '=' => {
                if self.chars.next_if_eq(&'=').is_some() {
                    Equal
                } else {
                    Assign
                }
            }
            '!' => {
                if self.chars.next_if_eq(&'=').is_some() {
                    NotEqual
                } else {
                    Bang
                }
            }
            '+' => Plus,
            '-' => Minus,
            '*' => Asterisk,
            '/' => Slash,
            '<' => LessThan,
            '>' => GreaterThan,
            ';' => Semicolon,
            ':' => Colon,
            ',' => Comma,
            '(' => LeftParentheses,
            ')' => RightParentheses,
            '{' => LeftBrace,
            '}' => RightBrace,
            '[' => LeftBracket,
            ']' => RightBracket,
            '"' => {
                let string = self.read_while(|c| c != '"');
                // The closing quote is either consumed here or the input
                // ended mid-string.
                match self.chars.next() {
                    Some(_) => StringLiteral(string),
                    None => Illegal(string),
                }
            }
            c if is_identifier_char(c) => {
                let mut identifier = c.to_string();
                identifier.push_str(&self.read_while(is_identifier_char));
                lookup_identifier(&identifier)
            }
            c if c.is_ascii_digit() => {
                let mut number = c.to_string();
                number.push_str(&self.read_while(|c| c.is_ascii_digit()));
                Integer(number.parse::<i64>()?)
            }
            illegal => Illegal(illegal.to_string()),
        };
        Ok(token)
    }

    fn read_while(&mut self, predicate: impl Fn(char) -> bool) -> String {
        let mut taken = String::new();
        while let Some(c) = self.chars.next_if(|c| predicate(*c)) {
            taken.push(c);
        }
        taken
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn lookup_identifier(identifier: &str) -> Token {
    match identifier {
        "fn" => Function,
        "let" => Let,
        "true" => True,
        "false" => False,
        "if" => If,
        "else" => Else,
        "return" => Return,
        _ => Identifier(identifier.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_token() -> Result<()> {
        let input = r#"let five = 5;
let ten = 10;
let add = fn(x, y) {
x + y;
};
let result = add(five, ten);
!-/*5;
5 < 10 > 5;
if (5 < 10) {
return true;
} else {
return false;
}
10 == 10;
10 != 9;
"foobar"
"foo bar"
[1, 2];
{"foo": "bar"}
"#;

        let tokens = [
            // let five = 5;
            Token::Let,
            Token::Identifier("five".to_string()),
            Token::Assign,
            Token::Integer(5),
            Token::Semicolon,
            // let ten = 10;
            Token::Let,
            Token::Identifier("ten".to_string()),
            Token::Assign,
            Token::Integer(10),
            Token::Semicolon,
            // let add = fn(x, y) { x + y; };
            Token::Let,
            Token::Identifier("add".to_string()),
            Token::Assign,
            Token::Function,
            Token::LeftParentheses,
            Token::Identifier("x".to_string()),
            Token::Comma,
            Token::Identifier("y".to_string()),
            Token::RightParentheses,
            Token::LeftBrace,
            Token::Identifier("x".to_string()),
            Token::Plus,
            Token::Identifier("y".to_string()),
            Token::Semicolon,
            Token::RightBrace,
            Token::Semicolon,
            // let result = add(five, ten);
            Token::Let,
            Token::Identifier("result".to_string()),
            Token::Assign,
            Token::Identifier("add".to_string()),
            Token::LeftParentheses,
            Token::Identifier("five".to_string()),
            Token::Comma,
            Token::Identifier("ten".to_string()),
            Token::RightParentheses,
            Token::Semicolon,
            // !-/*5;
            Token::Bang,
            Token::Minus,
            Token::Slash,
            Token::Asterisk,
            Token::Integer(5),
            Token::Semicolon,
            // 5 < 10 > 5;
            Token::Integer(5),
            Token::LessThan,
            Token::Integer(10),
            Token::GreaterThan,
            Token::Integer(5),
            Token::Semicolon,
            // if (5 < 10) { return true; } else { return false; }
            Token::If,
            Token::LeftParentheses,
            Token::Integer(5),
            Token::LessThan,
            Token::Integer(10),
            Token::RightParentheses,
            Token::LeftBrace,
            Token::Return,
            Token::True,
            Token::Semicolon,
            Token::RightBrace,
            Token::Else,
            Token::LeftBrace,
            Token::Return,
            Token::False,
            Token::Semicolon,
            Token::RightBrace,
            // 10 == 10;
            Token::Integer(10),
            Token::Equal,
            Token::Integer(10),
            Token::Semicolon,
            // 10 != 9;
            Token::Integer(10),
            Token::NotEqual,
            Token::Integer(9),
            Token::Semicolon,
            // string literals
            Token::StringLiteral("foobar".to_string()),
            Token::StringLiteral("foo bar".to_string()),
            // [1, 2];
            Token::LeftBracket,
            Token::Integer(1),
            Token::Comma,
            Token::Integer(2),
            Token::RightBracket,
            Token::Semicolon,
            // {"foo": "bar"}
            Token::LeftBrace,
            Token::StringLiteral("foo".to_string()),
            Token::Colon,
            Token::StringLiteral("bar".to_string()),
            Token::RightBrace,
            Token::EndOfFile,
        ];

        let mut lexer = Lexer::new(input);

        for token in tokens.iter() {
            assert_eq!(lexer.next_token()?, *token);
        }

        Ok(())
    }

    #[test]
    fn test_tokenize_terminates() -> Result<()> {
        let tokens = Lexer::new("1 + 2").tokenize()?;
        assert_eq!(
            tokens,
            vec![
                Token::Integer(1),
                Token::Plus,
                Token::Integer(2),
                Token::EndOfFile
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unterminated_string() -> Result<()> {
        let mut lexer = Lexer::new("\"abc");
        assert_eq!(lexer.next_token()?, Token::Illegal("abc".to_string()));
        Ok(())
    }
}
