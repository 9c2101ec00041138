//! Parameterized SQL text assembly

use rusqlite::ToSql;

use crate::storage::{Value, quote_ident};

/// SQL text plus the values bound to its `?` placeholders, in order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    pub fn new(head: &str) -> Self {
        Self {
            sql: head.to_string(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_ident(name));
        self
    }

    pub fn push_param(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }

    /// Write `items` separated by `sep`, each through `each`.
    pub fn push_list<T, F>(&mut self, items: &[T], sep: &str, mut each: F) -> &mut Self
    where
        F: FnMut(&mut Self, &T),
    {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            each(self, item);
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn bound(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|v| v as &dyn ToSql).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_tracks_params() {
        let mut sql = SqlBuilder::new("SELECT * FROM ");
        sql.push_ident("t").push(" WHERE ");
        sql.push_list(&["a", "b"], " AND ", |s, col| {
            s.push_ident(col).push(" = ").push_param(Value::from(*col));
        });

        assert_eq!(sql.sql(), "SELECT * FROM \"t\" WHERE \"a\" = ? AND \"b\" = ?");
        assert_eq!(sql.params(), &[Value::from("a"), Value::from("b")]);
        assert_eq!(sql.bound().len(), 2);
    }
}
