use crate::{
    object::{builtin_by_name, HashPair, Object},
    parser::{Expression, Literal, Operator, Statement},
};
use anyhow::{bail, Result};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

#[derive(Debug, Default, PartialEq, Clone)]
pub struct Environment {
    pub bindings: HashMap<String, Object>,
    pub outer: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new(outer: Option<Rc<RefCell<Environment>>>) -> Self {
        Self {
            outer,
            ..Default::default()
        }
    }

    pub fn new_rc(outer: Option<Rc<RefCell<Environment>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(outer)))
    }

    pub fn set_binding(&mut self, binding: String, value: Object) {
        self.bindings.insert(binding, value);
    }

    pub fn get_binding(&self, binding: &str) -> Option<Object> {
        if let Some(value) = self.bindings.get(binding) {
            return Some(value.clone());
        }
        self.outer
            .as_ref()
            .and_then(|outer| outer.borrow().get_binding(binding))
    }
}

/// Evaluates a whole program; a top-level `return` stops evaluation and its
/// value becomes the program's result.
pub fn evaluate_statements(
    statements: &[Statement],
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    let mut result = Object::Null;
    for statement in statements.iter() {
        result = evaluate_statement(statement, environment.clone())?;
        if let Object::Return(value) = result {
            return Ok(*value);
        }
    }
    Ok(result)
}

/// Evaluates a block, leaving `Return` wrapped so it can unwind through
/// nested blocks up to the enclosing function call.
fn evaluate_block(
    statements: &[Statement],
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    let mut result = Object::Null;
    for statement in statements.iter() {
        result = evaluate_statement(statement, environment.clone())?;
        if matches!(result, Object::Return(_)) {
            return Ok(result);
        }
    }
    Ok(result)
}

fn evaluate_statement(
    statement: &Statement,
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    Ok(match statement {
        Statement::Let(name, value) => {
            let value = evaluate_expression(value, environment.clone())?;
            environment.borrow_mut().set_binding(name.to_string(), value);
            Object::Null
        }
        Statement::Expression(expression) => evaluate_expression(expression, environment)?,
        Statement::Return(value) => {
            Object::Return(Box::new(evaluate_expression(value, environment)?))
        }
    })
}

fn evaluate_expressions(
    expressions: &[Expression],
    environment: Rc<RefCell<Environment>>,
) -> Result<Vec<Object>> {
    expressions
        .iter()
        .map(|expression| evaluate_expression(expression, environment.clone()))
        .collect()
}

fn evaluate_expression(
    expression: &Expression,
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    Ok(match expression {
        Expression::Identifier(name) => evaluate_identifier(name, environment)?,
        Expression::Literal(literal) => evaluate_literal(literal, environment)?,
        Expression::Boolean(value) => Object::Boolean(*value),
        Expression::Prefix(operator, operand) => {
            evaluate_prefix_expression(operator, operand, environment)?
        }
        Expression::Infix(left, operator, right) => {
            evaluate_infix_expression(left, operator, right, environment)?
        }
        Expression::If(condition, consequence, alternative) => {
            evaluate_if_expression(condition, consequence, alternative, environment)?
        }
        Expression::Function {
            parameters, body, ..
        } => Object::Function(parameters.to_vec(), body.to_vec(), environment),
        Expression::Call(function, arguments) => {
            let function = evaluate_expression(function, environment.clone())?;
            let arguments = evaluate_expressions(arguments, environment)?;
            apply_function(function, arguments)?
        }
        Expression::Index(left, index) => {
            let left = evaluate_expression(left, environment.clone())?;
            let index = evaluate_expression(index, environment)?;
            evaluate_index_expression(left, index)?
        }
    })
}

fn evaluate_identifier(name: &str, environment: Rc<RefCell<Environment>>) -> Result<Object> {
    if let Some(value) = environment.borrow().get_binding(name) {
        return Ok(value);
    }
    if let Some(builtin) = builtin_by_name(name) {
        return Ok(Object::Builtin(builtin));
    }
    bail!("identifier not found: {}", name)
}

fn evaluate_literal(literal: &Literal, environment: Rc<RefCell<Environment>>) -> Result<Object> {
    Ok(match literal {
        Literal::Integer(value) => Object::Integer(*value),
        Literal::String(value) => Object::string(value.clone()),
        Literal::Array(elements) => {
            Object::array(evaluate_expressions(elements, environment)?)
        }
        Literal::Hash(entries) => {
            let mut pairs = BTreeMap::new();
            for (key_expression, value_expression) in entries.iter() {
                let key = evaluate_expression(key_expression, environment.clone())?;
                let value = evaluate_expression(value_expression, environment.clone())?;
                let hash_key = match key.hash_key() {
                    Some(hash_key) => hash_key,
                    None => bail!("unusable as hash key: {}", key.type_name()),
                };
                pairs.insert(hash_key, HashPair { key, value });
            }
            Object::Hash(Rc::new(pairs))
        }
    })
}

fn evaluate_prefix_expression(
    operator: &Operator,
    operand: &Expression,
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    let value = evaluate_expression(operand, environment)?;
    Ok(match operator {
        Operator::Not => Object::Boolean(!value.is_truthy()),
        Operator::Negate => match value {
            Object::Integer(value) => Object::Integer(-value),
            other => bail!("unknown operator: -{}", other.type_name()),
        },
        operator => bail!("unknown prefix operator: {}", operator),
    })
}

fn evaluate_infix_expression(
    left: &Expression,
    operator: &Operator,
    right: &Expression,
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    let left_value = evaluate_expression(left, environment.clone())?;
    let right_value = evaluate_expression(right, environment)?;

    if let (Object::Integer(lhs), Object::Integer(rhs)) = (&left_value, &right_value) {
        return Ok(match operator {
            Operator::Add => Object::Integer(lhs + rhs),
            Operator::Subtract => Object::Integer(lhs - rhs),
            Operator::Multiply => Object::Integer(lhs * rhs),
            Operator::Divide => {
                if *rhs == 0 {
                    bail!("division by zero");
                }
                Object::Integer(lhs / rhs)
            }
            Operator::LessThan => Object::Boolean(lhs < rhs),
            Operator::GreaterThan => Object::Boolean(lhs > rhs),
            Operator::Equal => Object::Boolean(lhs == rhs),
            Operator::NotEqual => Object::Boolean(lhs != rhs),
            operator => bail!("unknown operator: INTEGER {} INTEGER", operator),
        });
    }

    if let (Object::String(lhs), Object::String(rhs)) = (&left_value, &right_value) {
        return Ok(match operator {
            Operator::Add => Object::string(format!("{}{}", lhs, rhs)),
            Operator::Equal => Object::Boolean(lhs == rhs),
            Operator::NotEqual => Object::Boolean(lhs != rhs),
            operator => bail!("unknown operator: STRING {} STRING", operator),
        });
    }

    match operator {
        Operator::Equal => Ok(Object::Boolean(left_value == right_value)),
        Operator::NotEqual => Ok(Object::Boolean(left_value != right_value)),
        operator if left_value.type_name() != right_value.type_name() => bail!(
            "type mismatch: {} {} {}",
            left_value.type_name(),
            operator,
            right_value.type_name()
        ),
        operator => bail!(
            "unknown operator: {} {} {}",
            left_value.type_name(),
            operator,
            right_value.type_name()
        ),
    }
}

fn evaluate_if_expression(
    condition: &Expression,
    consequence: &[Statement],
    alternative: &Option<Vec<Statement>>,
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    let condition = evaluate_expression(condition, environment.clone())?;
    if condition.is_truthy() {
        evaluate_block(consequence, environment)
    } else {
        match alternative.as_ref() {
            Some(alternative) => evaluate_block(alternative, environment),
            None => Ok(Object::Null),
        }
    }
}

fn apply_function(function: Object, arguments: Vec<Object>) -> Result<Object> {
    match function {
        Object::Function(parameters, body, environment) => {
            if arguments.len() != parameters.len() {
                bail!(
                    "wrong number of arguments: want={}, got={}",
                    parameters.len(),
                    arguments.len()
                );
            }
            let call_environment = Environment::new_rc(Some(environment));
            for (name, value) in parameters.iter().zip(arguments.into_iter()) {
                call_environment
                    .borrow_mut()
                    .set_binding(name.to_string(), value);
            }
            let result = evaluate_block(&body, call_environment)?;
            Ok(match result {
                Object::Return(value) => *value,
                other => other,
            })
        }
        Object::Builtin(builtin) => Ok((builtin.function)(&arguments)),
        other => bail!("not a function: {}", other.type_name()),
    }
}

fn evaluate_index_expression(left: Object, index: Object) -> Result<Object> {
    match (&left, &index) {
        (Object::Array(elements), Object::Integer(index)) => {
            if *index < 0 || *index as usize >= elements.len() {
                return Ok(Object::Null);
            }
            Ok(elements[*index as usize].clone())
        }
        (Object::Hash(pairs), index) => {
            let hash_key = match index.hash_key() {
                Some(hash_key) => hash_key,
                None => bail!("unusable as hash key: {}", index.type_name()),
            };
            Ok(pairs
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Object::Null))
        }
        _ => bail!("index operator not supported: {}", left.type_name()),
    }
}
