use rdf_odm_model::{OdmError, OdmResult};
use rdf_odm_schema::PropertyPath;
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// A filter operator on a single property path.
///
/// Every operator has an inverse, so negating a condition never fails. Operators with a
/// [Polarity::Negative] are compiled as the `NOT EXISTS` of their positive inverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
    NotRegex,
    /// Case-insensitive regular expression.
    IRegex,
    NotIRegex,
    /// The string length of the value equals the operand.
    StrLen,
    NotStrLen,
    Exists,
    NotExists,
    /// The property holds every value of the operand.
    All,
    NotAll,
    /// Full-text search.
    Search,
    NotSearch,
}

/// Whether an operator asks for the existence or the absence of a matching value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Operator {
    /// Parses an operator key such as `$gte`.
    pub fn from_key(key: &str) -> OdmResult<Self> {
        Ok(match key {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$in" => Self::In,
            "$nin" => Self::Nin,
            "$regex" => Self::Regex,
            "$nregex" => Self::NotRegex,
            "$iregex" => Self::IRegex,
            "$niregex" => Self::NotIRegex,
            "$strlen" => Self::StrLen,
            "$nstrlen" => Self::NotStrLen,
            "$exists" => Self::Exists,
            "$nexists" => Self::NotExists,
            "$all" => Self::All,
            "$nall" => Self::NotAll,
            "$search" => Self::Search,
            "$nsearch" => Self::NotSearch,
            _ => return Err(OdmError::UnknownOperator(key.to_owned())),
        })
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::Regex => "$regex",
            Self::NotRegex => "$nregex",
            Self::IRegex => "$iregex",
            Self::NotIRegex => "$niregex",
            Self::StrLen => "$strlen",
            Self::NotStrLen => "$nstrlen",
            Self::Exists => "$exists",
            Self::NotExists => "$nexists",
            Self::All => "$all",
            Self::NotAll => "$nall",
            Self::Search => "$search",
            Self::NotSearch => "$nsearch",
        }
    }

    /// The operator that matches exactly the documents this operator does not match.
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Lte,
            Self::Lte => Self::Gt,
            Self::Gte => Self::Lt,
            Self::Lt => Self::Gte,
            Self::In => Self::Nin,
            Self::Nin => Self::In,
            Self::Regex => Self::NotRegex,
            Self::NotRegex => Self::Regex,
            Self::IRegex => Self::NotIRegex,
            Self::NotIRegex => Self::IRegex,
            Self::StrLen => Self::NotStrLen,
            Self::NotStrLen => Self::StrLen,
            Self::Exists => Self::NotExists,
            Self::NotExists => Self::Exists,
            Self::All => Self::NotAll,
            Self::NotAll => Self::All,
            Self::Search => Self::NotSearch,
            Self::NotSearch => Self::Search,
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Self::Ne
            | Self::Nin
            | Self::NotRegex
            | Self::NotIRegex
            | Self::NotStrLen
            | Self::NotExists
            | Self::NotAll
            | Self::NotSearch => Polarity::Negative,
            Self::Eq
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte
            | Self::In
            | Self::Regex
            | Self::IRegex
            | Self::StrLen
            | Self::Exists
            | Self::All
            | Self::Search => Polarity::Positive,
        }
    }

    /// The positive form of this operator.
    #[must_use]
    pub fn positive(self) -> Self {
        match self.polarity() {
            Polarity::Positive => self,
            Polarity::Negative => self.inverse(),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A filter tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `path` compared to `operand` with `operator`.
    Compare {
        path: PropertyPath,
        operator: Operator,
        operand: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Creates a comparison.
    ///
    /// `$exists: false` is normalized to `$nexists: true` and `$nexists: false` to
    /// `$exists: true`.
    pub fn compare(path: impl Into<PropertyPath>, operator: Operator, operand: Value) -> Self {
        let (operator, operand) = match (operator, operand) {
            (Operator::Exists | Operator::NotExists, Value::Bool(false)) => {
                (operator.inverse(), Value::Bool(true))
            }
            (Operator::Exists | Operator::NotExists, _) => (operator, Value::Bool(true)),
            (operator, operand) => (operator, operand),
        };
        Self::Compare {
            path: path.into(),
            operator,
            operand,
        }
    }

    pub fn equals(path: &str, operand: Value) -> Self {
        Self::compare(path, Operator::Eq, operand)
    }

    /// The condition that holds exactly when this condition does not.
    ///
    /// Connectives are rewritten with De Morgan's laws and comparisons are inverted, so the result
    /// contains no [Condition::Not].
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Compare {
                path,
                operator,
                operand,
            } => Self::Compare {
                path,
                operator: operator.inverse(),
                operand,
            },
            Self::And(children) => Self::Or(children.into_iter().map(Self::negate).collect()),
            Self::Or(children) => Self::And(children.into_iter().map(Self::negate).collect()),
            Self::Not(child) => child.eliminate_not(),
        }
    }

    /// Pushes every [Condition::Not] down to the comparisons.
    #[must_use]
    pub fn eliminate_not(self) -> Self {
        match self {
            Self::Compare { .. } => self,
            Self::And(children) => {
                Self::And(children.into_iter().map(Self::eliminate_not).collect())
            }
            Self::Or(children) => Self::Or(children.into_iter().map(Self::eliminate_not).collect()),
            Self::Not(child) => child.negate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL: [Operator; 20] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Regex,
        Operator::NotRegex,
        Operator::IRegex,
        Operator::NotIRegex,
        Operator::StrLen,
        Operator::NotStrLen,
        Operator::Exists,
        Operator::NotExists,
        Operator::All,
        Operator::NotAll,
        Operator::Search,
        Operator::NotSearch,
    ];

    #[test]
    fn inverse_is_an_involution() {
        for operator in ALL {
            assert_eq!(operator.inverse().inverse(), operator);
            assert_eq!(Operator::from_key(operator.key()).unwrap(), operator);
        }
    }

    #[test]
    fn positive_forms_have_positive_polarity() {
        for operator in ALL {
            assert_eq!(operator.positive().polarity(), Polarity::Positive);
        }
        assert_eq!(Operator::Nin.positive(), Operator::In);
        assert_eq!(Operator::Gt.positive(), Operator::Gt);
    }

    #[test]
    fn exists_false_is_nexists_true() {
        assert_eq!(
            Condition::compare("title", Operator::Exists, json!(false)),
            Condition::compare("title", Operator::NotExists, json!(true))
        );
        assert_eq!(
            Condition::compare("title", Operator::NotExists, json!(false)),
            Condition::compare("title", Operator::Exists, json!(true))
        );
    }

    #[test]
    fn negation_follows_de_morgan() {
        let a = Condition::compare("a", Operator::Gt, json!(1));
        let b = Condition::compare("b", Operator::In, json!([1, 2]));
        let negated = Condition::Not(Box::new(Condition::And(vec![a.clone(), b.clone()])));
        assert_eq!(
            negated.eliminate_not(),
            Condition::Or(vec![
                Condition::compare("a", Operator::Lte, json!(1)),
                Condition::compare("b", Operator::Nin, json!([1, 2])),
            ])
        );

        let double = Condition::Not(Box::new(Condition::Not(Box::new(a.clone()))));
        assert_eq!(double.eliminate_not(), a);

        let or = Condition::Not(Box::new(Condition::Or(vec![a, b])));
        assert!(matches!(or.eliminate_not(), Condition::And(children) if children.len() == 2));
    }

    #[test]
    fn unknown_operator() {
        assert!(matches!(
            Operator::from_key("$near"),
            Err(OdmError::UnknownOperator(key)) if key == "$near"
        ));
    }
}
