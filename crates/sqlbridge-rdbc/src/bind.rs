//! Named-parameter binding
//!
//! Statements arrive with `%(key)s` placeholders and a parameter dictionary.
//! Backends want positional parameters, so the placeholders are rewritten to
//! the backend's style (`$1..$n` or `?`) and the referenced values collected
//! in placeholder order. `%%` escapes a literal percent. This is plain
//! placeholder scanning, not SQL parsing; everything else in the statement
//! passes through untouched.

use crate::error::{Error, Result};
use crate::types::{Params, SqlValue};

/// Positional placeholder style of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
    /// `?` (MySQL, SQLite)
    Question,
}

/// Rewrite `%(key)s` placeholders to positional style.
///
/// Returns the rewritten statement and the referenced values in placeholder
/// order. Repeated keys produce repeated positions. A placeholder naming a
/// key absent from `params` is an error.
pub fn bind_named(
    sql: &str,
    params: &Params,
    style: Placeholder,
) -> Result<(String, Vec<SqlValue>)> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '%')) => {
                chars.next();
                out.push('%');
            }
            Some((_, '(')) => {
                chars.next();
                let mut key = String::new();
                let mut closed = false;
                for (_, kc) in chars.by_ref() {
                    if kc == ')' {
                        closed = true;
                        break;
                    }
                    key.push(kc);
                }
                if !closed {
                    return Err(Error::query_with_sql(
                        format!("unterminated placeholder at byte {start}"),
                        sql,
                    ));
                }
                match chars.next() {
                    Some((_, 's')) => {}
                    _ => {
                        return Err(Error::query_with_sql(
                            format!("placeholder %({key})... must end with 's'"),
                            sql,
                        ));
                    }
                }
                let value = params.get(&key).ok_or_else(|| {
                    Error::query_with_sql(format!("no parameter named {key:?}"), sql)
                })?;
                values.push(value.clone());
                match style {
                    Placeholder::Dollar => {
                        out.push('$');
                        out.push_str(&values.len().to_string());
                    }
                    Placeholder::Question => out.push('?'),
                }
            }
            _ => {
                // A bare percent (e.g. in `like 'a%'`) passes through.
                out.push('%');
            }
        }
    }

    Ok((out, values))
}
