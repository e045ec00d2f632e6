use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

/// An immutable, shareable label map.
#[derive(Clone, Debug, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: Option<BTreeSet<String>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    Exists,
}

/// Selects a set of pods. The result of `match_labels` and
/// `match_expressions` are ANDed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

// === impl Selector ===

impl Selector {
    fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels {
                if labels.0.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

/// Renders the selector in the API server's wire syntax, e.g.
/// `faas_function,faas_function=figlet`.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            Ok(())
        };
        for expr in self.match_expressions.iter().flatten() {
            sep(f)?;
            write!(f, "{expr}")?;
        }
        for (k, v) in self.match_labels.iter().flatten() {
            sep(f)?;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

// === impl Expression ===

impl Expression {
    pub fn exists(key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            operator: Operator::Exists,
            values: None,
        }
    }

    pub fn equals(key: impl ToString, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            operator: Operator::In,
            values: Some(Some(value.to_string()).into_iter().collect()),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => match labels.get(&self.key) {
                Some(v) => self.values.as_ref().map(|vs| vs.contains(v)).unwrap_or(false),
                None => false,
            },
            Operator::Exists => labels.contains_key(&self.key),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.operator, self.values.as_ref()) {
            (Operator::Exists, _) | (Operator::In, None) => f.write_str(&self.key),
            (Operator::In, Some(values)) if values.len() == 1 => {
                let value = values.iter().next().expect("a single value");
                write!(f, "{}={}", self.key, value)
            }
            (Operator::In, Some(values)) => {
                write!(f, "{} in (", self.key)?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(value)?;
                }
                f.write_str(")")
            }
        }
    }
}

// === impl Labels ===

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}
