//! Parsed policy document model
//!
//! Documents arrive already parsed. The AST is plain data with serde support so
//! a parser living in another process can hand documents over as JSON. Every
//! node kind is a variant of a sum type and the interpreter dispatches on them
//! exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Import table: short name -> fully-qualified name
pub type Imports = BTreeMap<String, String>;

/// Resolve a function or attribute name through an import table
pub fn resolve_name(imports: &Imports, name: &str) -> String {
    imports.get(name).cloned().unwrap_or_else(|| name.to_string())
}

/// Entitlement granted by a document whose body holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    Permit,
    Deny,
}

/// A single policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique document name
    pub name: String,

    /// Permit or deny
    pub entitlement: Entitlement,

    /// Short name -> fully-qualified name for functions
    #[serde(default)]
    pub imports: Imports,

    /// Applicability condition. `None` matches every subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Expression>,

    /// Body statements, evaluated lazily in order
    #[serde(default)]
    pub body: Vec<Statement>,

    #[serde(default)]
    pub obligations: Vec<Expression>,

    #[serde(default)]
    pub advice: Vec<Expression>,

    /// Resource transformation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Expression>,
}

impl Document {
    /// Create a document without target or body
    pub fn new(name: impl Into<String>, entitlement: Entitlement) -> Self {
        Self {
            name: name.into(),
            entitlement,
            imports: Imports::new(),
            target: None,
            body: Vec::new(),
            obligations: Vec::new(),
            advice: Vec::new(),
            transformation: None,
        }
    }

    pub fn with_target(mut self, target: Expression) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.body.push(statement);
        self
    }

    pub fn with_import(mut self, short: impl Into<String>, qualified: impl Into<String>) -> Self {
        self.imports.insert(short.into(), qualified.into());
        self
    }

    pub fn with_obligation(mut self, obligation: Expression) -> Self {
        self.obligations.push(obligation);
        self
    }

    pub fn with_advice(mut self, advice: Expression) -> Self {
        self.advice.push(advice);
        self
    }

    pub fn with_transformation(mut self, transformation: Expression) -> Self {
        self.transformation = Some(transformation);
        self
    }
}

/// Body statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    /// `var name = value;`
    ValueDefinition { name: String, value: Expression },

    /// A boolean condition
    Condition(Expression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    /// Lazy `&&`
    And,
    /// Lazy `||`
    Or,
    /// Eager `&`
    EagerAnd,
    /// Eager `|`
    EagerOr,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    /// `in`
    ElementOf,
    /// `=~`
    Regex,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Basic(BasicExpression),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

/// A head value followed by steps and an optional filter or subtemplate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicExpression {
    pub head: Head,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<Tail>,
}

/// Start of a basic expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Head {
    /// `( expression )`
    Group(Box<Expression>),
    /// JSON literal
    Value(Value),
    /// `undefined`
    Undefined,
    /// `[ a, b, ... ]`
    Array(Vec<Expression>),
    /// `{ "k": v, ... }`
    Object(Vec<(String, Expression)>),
    /// `lib.fn(args)`
    Function {
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
    },
    /// Variable reference
    Identifier(String),
    /// `@`
    Relative,
}

/// Filter (`|-`) or subtemplate (`::`) applied after the steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tail {
    Filter(FilterComponent),
    Subtemplate(Box<Expression>),
}

/// Path step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// `.key` / `["key"]`
    Key(String),
    /// `[i]`, negative indices count from the end
    Index(i64),
    /// `.*` / `[*]`
    Wildcard,
    /// `[from:to:step]`
    Slice {
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
        #[serde(default)]
        step: Option<i64>,
    },
    /// `..key`
    RecursiveKey(String),
    /// `..[i]`
    RecursiveIndex(i64),
    /// `[?(condition)]`
    Condition(Box<Expression>),
    /// `.<lib.attribute(args)>`; `head` takes only the first value
    AttributeFinder {
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default)]
        head: bool,
    },
}

/// Filter component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterComponent {
    /// `|- each function(args)`
    Simple {
        function: String,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default)]
        each: bool,
    },
    /// `|- { each @.path : function(args), ... }`
    Extended(Vec<FilterStatement>),
}

/// One statement of an extended filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStatement {
    /// Steps selecting what to rewrite, relative to the filtered value
    #[serde(default)]
    pub target: Vec<Step>,

    pub function: String,

    #[serde(default)]
    pub arguments: Vec<Expression>,

    #[serde(default)]
    pub each: bool,
}

impl FilterStatement {
    pub fn new(target: Vec<Step>, function: impl Into<String>) -> Self {
        Self {
            target,
            function: function.into(),
            arguments: Vec::new(),
            each: false,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Expression>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn each(mut self) -> Self {
        self.each = true;
        self
    }
}

impl Expression {
    fn basic(head: Head) -> Self {
        Expression::Basic(BasicExpression {
            head,
            steps: Vec::new(),
            tail: None,
        })
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::basic(Head::Value(value.into()))
    }

    pub fn undefined() -> Self {
        Self::basic(Head::Undefined)
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::basic(Head::Identifier(name.into()))
    }

    pub fn relative() -> Self {
        Self::basic(Head::Relative)
    }

    pub fn array(items: Vec<Expression>) -> Self {
        Self::basic(Head::Array(items))
    }

    pub fn object(fields: Vec<(&str, Expression)>) -> Self {
        Self::basic(Head::Object(
            fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        ))
    }

    pub fn function(name: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Self::basic(Head::Function {
            name: name.into(),
            arguments,
        })
    }

    pub fn group(expression: Expression) -> Self {
        Self::basic(Head::Group(Box::new(expression)))
    }

    /// Append a step. Non-basic expressions and expressions that already
    /// carry a tail are grouped first.
    pub fn step(self, step: Step) -> Self {
        match self {
            Expression::Basic(mut basic) if basic.tail.is_none() => {
                basic.steps.push(step);
                Expression::Basic(basic)
            }
            other => Self::group(other).step(step),
        }
    }

    /// Shorthand for `.step(Step::Key(key))`
    pub fn key(self, key: &str) -> Self {
        self.step(Step::Key(key.to_string()))
    }

    pub fn filter(self, filter: FilterComponent) -> Self {
        self.with_tail(Tail::Filter(filter))
    }

    pub fn subtemplate(self, template: Expression) -> Self {
        self.with_tail(Tail::Subtemplate(Box::new(template)))
    }

    fn with_tail(self, tail: Tail) -> Self {
        match self {
            Expression::Basic(mut basic) if basic.tail.is_none() => {
                basic.tail = Some(tail);
                Expression::Basic(basic)
            }
            other => Self::group(other).with_tail(tail),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expression) -> Self {
        Self::unary(UnaryOperator::Not, operand)
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOperator::And, left, right)
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOperator::Or, left, right)
    }

    pub fn equals(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOperator::Equals, left, right)
    }

    /// Literal boolean constant, if this expression is exactly one
    pub fn as_bool_literal(&self) -> Option<bool> {
        match self {
            Expression::Basic(BasicExpression {
                head: Head::Value(Value::Bool(b)),
                steps,
                tail: None,
            }) if steps.is_empty() => Some(*b),
            _ => None,
        }
    }

    /// Whether an attribute finder step occurs anywhere in the tree
    pub fn contains_attribute_finder(&self) -> bool {
        match self {
            Expression::Basic(basic) => basic.contains_attribute_finder(),
            Expression::Unary { operand, .. } => operand.contains_attribute_finder(),
            Expression::Binary { left, right, .. } => {
                left.contains_attribute_finder() || right.contains_attribute_finder()
            }
        }
    }

    /// Copy of this expression with every function name resolved through
    /// `imports`. Structurally identical predicates normalize to identical
    /// trees regardless of how the function was spelled.
    pub fn resolve_imports(&self, imports: &Imports) -> Expression {
        match self {
            Expression::Basic(basic) => Expression::Basic(basic.resolve_imports(imports)),
            Expression::Unary { op, operand } => Expression::Unary {
                op: *op,
                operand: Box::new(operand.resolve_imports(imports)),
            },
            Expression::Binary { op, left, right } => Expression::Binary {
                op: *op,
                left: Box::new(left.resolve_imports(imports)),
                right: Box::new(right.resolve_imports(imports)),
            },
        }
    }
}

impl BasicExpression {
    fn contains_attribute_finder(&self) -> bool {
        let head = match &self.head {
            Head::Group(inner) => inner.contains_attribute_finder(),
            Head::Array(items) => items.iter().any(Expression::contains_attribute_finder),
            Head::Object(fields) => fields.iter().any(|(_, v)| v.contains_attribute_finder()),
            Head::Function { arguments, .. } => {
                arguments.iter().any(Expression::contains_attribute_finder)
            }
            Head::Value(_) | Head::Undefined | Head::Identifier(_) | Head::Relative => false,
        };
        let tail = match &self.tail {
            Some(Tail::Filter(filter)) => filter.contains_attribute_finder(),
            Some(Tail::Subtemplate(template)) => template.contains_attribute_finder(),
            None => false,
        };
        head || tail || self.steps.iter().any(Step::contains_attribute_finder)
    }

    fn resolve_imports(&self, imports: &Imports) -> BasicExpression {
        let head = match &self.head {
            Head::Group(inner) => Head::Group(Box::new(inner.resolve_imports(imports))),
            Head::Array(items) => {
                Head::Array(items.iter().map(|i| i.resolve_imports(imports)).collect())
            }
            Head::Object(fields) => Head::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.resolve_imports(imports)))
                    .collect(),
            ),
            Head::Function { name, arguments } => Head::Function {
                name: resolve_name(imports, name),
                arguments: arguments.iter().map(|a| a.resolve_imports(imports)).collect(),
            },
            other => other.clone(),
        };
        let tail = self.tail.as_ref().map(|tail| match tail {
            Tail::Filter(filter) => Tail::Filter(filter.resolve_imports(imports)),
            Tail::Subtemplate(template) => {
                Tail::Subtemplate(Box::new(template.resolve_imports(imports)))
            }
        });
        BasicExpression {
            head,
            steps: self.steps.iter().map(|s| s.resolve_imports(imports)).collect(),
            tail,
        }
    }
}

impl Step {
    fn contains_attribute_finder(&self) -> bool {
        match self {
            Step::AttributeFinder { .. } => true,
            Step::Condition(condition) => condition.contains_attribute_finder(),
            _ => false,
        }
    }

    fn resolve_imports(&self, imports: &Imports) -> Step {
        match self {
            Step::Condition(condition) => Step::Condition(Box::new(condition.resolve_imports(imports))),
            Step::AttributeFinder {
                name,
                arguments,
                head,
            } => Step::AttributeFinder {
                name: resolve_name(imports, name),
                arguments: arguments.iter().map(|a| a.resolve_imports(imports)).collect(),
                head: *head,
            },
            other => other.clone(),
        }
    }
}

impl FilterComponent {
    fn contains_attribute_finder(&self) -> bool {
        match self {
            FilterComponent::Simple { arguments, .. } => {
                arguments.iter().any(Expression::contains_attribute_finder)
            }
            FilterComponent::Extended(statements) => statements.iter().any(|s| {
                s.target.iter().any(Step::contains_attribute_finder)
                    || s.arguments.iter().any(Expression::contains_attribute_finder)
            }),
        }
    }

    fn resolve_imports(&self, imports: &Imports) -> FilterComponent {
        match self {
            FilterComponent::Simple {
                function,
                arguments,
                each,
            } => FilterComponent::Simple {
                function: resolve_name(imports, function),
                arguments: arguments.iter().map(|a| a.resolve_imports(imports)).collect(),
                each: *each,
            },
            FilterComponent::Extended(statements) => FilterComponent::Extended(
                statements
                    .iter()
                    .map(|s| FilterStatement {
                        target: s.target.iter().map(|t| t.resolve_imports(imports)).collect(),
                        function: resolve_name(imports, &s.function),
                        arguments: s.arguments.iter().map(|a| a.resolve_imports(imports)).collect(),
                        each: s.each,
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_builder_groups_after_tail() {
        let expr = Expression::identifier("x")
            .filter(FilterComponent::Simple {
                function: "filter.remove".to_string(),
                arguments: vec![],
                each: false,
            })
            .key("a");

        match expr {
            Expression::Basic(BasicExpression { head: Head::Group(_), steps, tail: None }) => {
                assert_eq!(steps, vec![Step::Key("a".to_string())]);
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_bool_literal_detection() {
        assert_eq!(Expression::value(true).as_bool_literal(), Some(true));
        assert_eq!(Expression::value(true).key("a").as_bool_literal(), None);
        assert_eq!(Expression::value(1).as_bool_literal(), None);
    }

    #[test]
    fn test_contains_attribute_finder() {
        let plain = Expression::identifier("subject").key("role");
        assert!(!plain.contains_attribute_finder());

        let nested = Expression::and(
            plain.clone(),
            Expression::array(vec![Expression::identifier("subject").step(Step::AttributeFinder {
                name: "user.profile".to_string(),
                arguments: vec![],
                head: false,
            })]),
        );
        assert!(nested.contains_attribute_finder());
    }

    #[test]
    fn test_resolve_imports_rewrites_function_names() {
        let mut imports = Imports::new();
        imports.insert("length".to_string(), "standard.length".to_string());

        let expr = Expression::function("length", vec![Expression::identifier("resource")]);
        let resolved = expr.resolve_imports(&imports);

        assert_eq!(
            resolved,
            Expression::function("standard.length", vec![Expression::identifier("resource")])
        );
    }

    #[test]
    fn test_document_json_round_trip() {
        let doc = Document::new("p1", Entitlement::Permit)
            .with_target(Expression::equals(
                Expression::identifier("action"),
                Expression::value("read"),
            ))
            .with_statement(Statement::Condition(Expression::value(true)));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["entitlement"], json!("permit"));
        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
