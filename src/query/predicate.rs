use crate::core::types::Value;

/// Typed query predicate: field equality and conjunction.
///
/// `Predicate::all()` (an empty conjunction) matches every record.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { field: String, value: Value },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn all() -> Self {
        Predicate::And(Vec::new())
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(predicates.into_iter().collect())
    }

    /// Conjunction of `field == value` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Predicate::And(pairs.into_iter().map(|(k, v)| Predicate::eq(k, v)).collect())
    }

    /// Add one more equality to the conjunction
    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let next = Predicate::eq(field, value);
        match self {
            Predicate::And(mut parts) => {
                parts.push(next);
                Predicate::And(parts)
            }
            single => Predicate::And(vec![single, next]),
        }
    }

    /// Flatten into the equality criteria it is made of
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        let mut out = Vec::new();
        self.collect_equalities(&mut out);
        out
    }

    fn collect_equalities<'a>(&'a self, out: &mut Vec<(&'a str, &'a Value)>) {
        match self {
            Predicate::Eq { field, value } => out.push((field.as_str(), value)),
            Predicate::And(parts) => {
                for p in parts {
                    p.collect_equalities(out);
                }
            }
        }
    }

    pub fn is_match_all(&self) -> bool {
        match self {
            Predicate::Eq { .. } => false,
            Predicate::And(parts) => parts.iter().all(Predicate::is_match_all),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_conjunctions_flatten() {
        let p = Predicate::and([
            Predicate::eq("x", 1),
            Predicate::and([Predicate::eq("y", "a"), Predicate::all()]),
        ]);
        let eqs = p.equalities();
        assert_eq!(eqs.len(), 2);
        assert_eq!(eqs[0], ("x", &Value::Int(1)));
        assert_eq!(eqs[1], ("y", &Value::Text("a".into())));
    }

    #[test]
    fn test_match_all() {
        assert!(Predicate::all().is_match_all());
        assert!(Predicate::and([Predicate::all()]).is_match_all());
        assert!(!Predicate::eq("x", 1).is_match_all());
    }

    #[test]
    fn test_and_eq_chains() {
        let p = Predicate::eq("x", 1).and_eq("y", 2).and_eq("z", 3);
        assert_eq!(p.equalities().len(), 3);
    }
}
