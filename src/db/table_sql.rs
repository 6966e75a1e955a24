//! Editing the stored `CREATE TABLE` text of a SQLite table.
//!
//! The catalog pragmas do not report `COLLATE`, `CHECK`, generated column
//! expressions or table options such as `WITHOUT ROWID`. A rebuild therefore
//! works on the original statement: it splits the column list into its
//! elements, replaces only the element it was asked to change and writes
//! everything else back as it was written.
//!
//! Tokens come from the sqlparser tokenizer with unescaping turned off, so
//! printing a token reproduces its source text.

use crate::db::Dialect;
use crate::db::literal::quote_ident;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Word};

/// Tokenize SQLite text keeping escape sequences as written.
pub fn tokenize(sql: &str) -> Option<Vec<Token>> {
    Tokenizer::new(&SQLiteDialect {}, sql)
        .with_unescape(false)
        .tokenize()
        .ok()
}

/// Source text of `tokens`, trimmed.
pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(ToString::to_string).collect::<String>().trim().to_string()
}

/// Identifier named by `word`, with doubled quote characters collapsed.
pub fn ident_name(word: &Word) -> String {
    match word.quote_style {
        Some('"') => word.value.replace("\"\"", "\""),
        Some('`') => word.value.replace("``", "`"),
        _ => word.value.clone(),
    }
}

fn quoted_word(name: &str) -> Token {
    Token::Word(Word {
        value: name.replace('"', "\"\""),
        quote_style: Some('"'),
        keyword: Keyword::NoKeyword,
    })
}

fn is_blank(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_))
}

fn keyword(token: &Token) -> Option<Keyword> {
    match token {
        Token::Word(w) if w.quote_style.is_none() => Some(w.keyword),
        _ => None,
    }
}

fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !is_blank(&tokens[i]))
}

fn prev_significant(tokens: &[Token], before: usize) -> Option<usize> {
    (0..before).rev().find(|&i| !is_blank(&tokens[i]))
}

/// Rewrite references to column `old` as `new`.
///
/// Function names (a word followed by `(`) and the column list after
/// `REFERENCES <table>` are left alone. A qualified reference `q.old` is only
/// rewritten when `q` is one of `qualifiers`; bare references only when
/// `unqualified` is set.
pub fn rename_column_refs(tokens: &mut [Token], old: &str, new: &str, qualifiers: &[&str], unqualified: bool) {
    let mut skip_group: Option<usize> = None;
    let mut after_references = false;
    let mut depth = 0usize;

    for i in 0..tokens.len() {
        match &tokens[i] {
            Token::LParen => {
                if after_references && skip_group.is_none() {
                    skip_group = Some(depth);
                }
                depth += 1;
                continue;
            }
            Token::RParen => {
                depth = depth.saturating_sub(1);
                if skip_group == Some(depth) {
                    skip_group = None;
                    after_references = false;
                }
                continue;
            }
            _ => {}
        }
        if skip_group.is_some() {
            continue;
        }
        let Token::Word(word) = &tokens[i] else {
            continue;
        };
        if word.quote_style.is_none() && word.keyword == Keyword::REFERENCES {
            after_references = true;
            continue;
        }
        if after_references {
            // the referenced table name; a group may or may not follow
            if next_significant(tokens, i + 1).is_none_or(|n| tokens[n] != Token::LParen) {
                after_references = false;
            }
            continue;
        }
        if !ident_name(word).eq_ignore_ascii_case(old) {
            continue;
        }
        if next_significant(tokens, i + 1).is_some_and(|n| tokens[n] == Token::LParen) {
            continue;
        }
        let allowed = match prev_significant(tokens, i).filter(|&p| tokens[p] == Token::Period) {
            Some(p) => prev_significant(tokens, p).is_some_and(|q| match &tokens[q] {
                Token::Word(w) => qualifiers.iter().any(|x| ident_name(w).eq_ignore_ascii_case(x)),
                _ => false,
            }),
            None => unqualified,
        };
        if allowed {
            tokens[i] = quoted_word(new);
        }
    }
}

/// [`rename_column_refs`] over everything after the first `(`, which skips
/// the object and table names of `CREATE INDEX`.
pub fn rename_in_index(sql: &str, old: &str, new: &str) -> Option<String> {
    let mut tokens = tokenize(sql)?;
    let open = tokens.iter().position(|t| *t == Token::LParen)?;
    rename_column_refs(&mut tokens[open..], old, new, &[], true);
    Some(render(&tokens))
}

/// Rename a column inside `CREATE TRIGGER` text.
///
/// Only the `UPDATE OF` list and references qualified with `NEW`, `OLD` or
/// the table name are rewritten. A bare name in the body may belong to any
/// table the body touches.
pub fn rename_in_trigger(sql: &str, table: &str, old: &str, new: &str) -> Option<String> {
    let mut tokens = tokenize(sql)?;
    let body = tokens
        .iter()
        .position(|t| keyword(t) == Some(Keyword::BEGIN))
        .unwrap_or(tokens.len());
    let of = tokens[..body].iter().position(|t| keyword(t) == Some(Keyword::OF));
    let on = tokens[..body].iter().position(|t| keyword(t) == Some(Keyword::ON));
    if let (Some(of), Some(on)) = (of, on) {
        if of < on {
            rename_column_refs(&mut tokens[of + 1..on], old, new, &[], true);
        }
    }
    rename_column_refs(&mut tokens, old, new, &["new", "old", table], false);
    Some(render(&tokens))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Column { name: String, tokens: Vec<Token> },
    Constraint { kind: ConstraintKind, tokens: Vec<Token> },
}

impl Element {
    fn classify(tokens: Vec<Token>) -> Option<Self> {
        let first = next_significant(&tokens, 0)?;
        let kind_at = |i: usize| match keyword(&tokens[i]) {
            Some(Keyword::PRIMARY) => Some(ConstraintKind::PrimaryKey),
            Some(Keyword::UNIQUE) => Some(ConstraintKind::Unique),
            Some(Keyword::CHECK) => Some(ConstraintKind::Check),
            Some(Keyword::FOREIGN) => Some(ConstraintKind::ForeignKey),
            _ => None,
        };
        if keyword(&tokens[first]) == Some(Keyword::CONSTRAINT) {
            let name = next_significant(&tokens, first + 1)?;
            let kind = kind_at(next_significant(&tokens, name + 1)?)?;
            return Some(Self::Constraint { kind, tokens });
        }
        if let Some(kind) = kind_at(first) {
            return Some(Self::Constraint { kind, tokens });
        }
        let Token::Word(word) = &tokens[first] else {
            return None;
        };
        Some(Self::Column {
            name: ident_name(word),
            tokens,
        })
    }

    pub fn tokens(&self) -> &[Token] {
        match self {
            Self::Column { tokens, .. } | Self::Constraint { tokens, .. } => tokens,
        }
    }

    fn tokens_mut(&mut self) -> &mut Vec<Token> {
        match self {
            Self::Column { tokens, .. } | Self::Constraint { tokens, .. } => tokens,
        }
    }

    /// Rewrite references to column `old` in this element.
    pub fn rename_refs(&mut self, old: &str, new: &str) {
        rename_column_refs(self.tokens_mut(), old, new, &[], true);
    }

    pub fn is_column(&self, column: &str) -> bool {
        matches!(self, Self::Column { name, .. } if name.eq_ignore_ascii_case(column))
    }

    /// Column names inside the first parenthesized group, for key constraints.
    pub fn key_columns(&self) -> Vec<String> {
        let tokens = self.tokens();
        let Some(open) = tokens.iter().position(|t| *t == Token::LParen) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut expect_name = true;
        for token in &tokens[open + 1..] {
            match token {
                Token::RParen => break,
                Token::Comma => expect_name = true,
                Token::Word(w) if expect_name => {
                    out.push(ident_name(w));
                    expect_name = false;
                }
                _ => {}
            }
        }
        out
    }

    /// True when a column element declares `PRIMARY KEY` inline.
    pub fn has_inline_primary_key(&self) -> bool {
        let Self::Column { tokens, .. } = self else {
            return false;
        };
        tokens.iter().enumerate().any(|(i, t)| {
            keyword(t) == Some(Keyword::PRIMARY)
                && next_significant(tokens, i + 1).is_some_and(|n| keyword(&tokens[n]) == Some(Keyword::KEY))
        })
    }

    /// Remove an inline `[CONSTRAINT name] PRIMARY KEY [ASC|DESC]
    /// [ON CONFLICT x] [AUTOINCREMENT]` from a column element.
    pub fn strip_inline_primary_key(&mut self) {
        if !self.has_inline_primary_key() {
            return;
        }
        let tokens = self.tokens_mut();
        let Some(start) = tokens.iter().position(|t| keyword(t) == Some(Keyword::PRIMARY)) else {
            return;
        };
        let mut from = start;
        if let Some(name) = prev_significant(tokens, start) {
            if let Some(kw) = prev_significant(tokens, name).filter(|&k| keyword(&tokens[k]) == Some(Keyword::CONSTRAINT)) {
                from = kw;
            }
        }
        // PRIMARY KEY
        let mut end = next_significant(tokens, start + 1).map_or(tokens.len(), |k| k + 1);
        let peek = |end: usize, kws: &[Keyword]| {
            next_significant(tokens, end).filter(|&n| keyword(&tokens[n]).is_some_and(|k| kws.contains(&k)))
        };
        if let Some(n) = peek(end, &[Keyword::ASC, Keyword::DESC]) {
            end = n + 1;
        }
        if let Some(on) = peek(end, &[Keyword::ON]) {
            // ON CONFLICT <resolution>
            end = next_significant(tokens, on + 1)
                .and_then(|c| next_significant(tokens, c + 1))
                .map_or(tokens.len(), |r| r + 1);
        }
        if let Some(n) = peek(end, &[Keyword::AUTOINCREMENT]) {
            end = n + 1;
        }
        tokens.drain(from..end);
    }
}

/// A parsed `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub elements: Vec<Element>,
    /// Everything after the closing parenthesis (`WITHOUT ROWID`, `STRICT`).
    pub options: Vec<Token>,
}

impl CreateTable {
    /// Split `sql` into column and constraint elements.
    ///
    /// Returns `None` for text it cannot take apart, such as
    /// `CREATE TABLE .. AS SELECT`.
    pub fn parse(sql: &str) -> Option<Self> {
        let tokens = tokenize(sql)?;
        let open = tokens.iter().position(|t| *t == Token::LParen)?;

        let mut depth = 0usize;
        let mut current = Vec::new();
        let mut groups = Vec::new();
        let mut close = None;
        for (i, token) in tokens.iter().enumerate().skip(open + 1) {
            match token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => {
                    close = Some(i);
                    break;
                }
                Token::RParen => depth -= 1,
                Token::Comma if depth == 0 => {
                    groups.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(token.clone());
        }
        let close = close?;
        groups.push(current);

        let elements = groups
            .into_iter()
            .map(Element::classify)
            .collect::<Option<Vec<_>>>()?;
        let options = tokens[close + 1..]
            .iter()
            .filter(|t| **t != Token::SemiColon)
            .cloned()
            .collect();
        Some(Self { elements, options })
    }

    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.is_column(column))
    }

    pub fn table_primary_key(&self) -> Option<usize> {
        self.elements.iter().position(|e| {
            matches!(
                e,
                Element::Constraint {
                    kind: ConstraintKind::PrimaryKey,
                    ..
                }
            )
        })
    }

    /// Index after the last column element, where new columns go.
    pub fn column_end(&self) -> usize {
        self.elements
            .iter()
            .rposition(|e| matches!(e, Element::Column { .. }))
            .map_or(0, |i| i + 1)
    }

    /// Render `CREATE TABLE` from already-rendered element lines.
    pub fn render_with(&self, table: &str, lines: &[String]) -> String {
        let options = self
            .options
            .iter()
            .map(ToString::to_string)
            .collect::<String>();
        let options = options.trim_end();
        let options = if options.is_empty() || options.starts_with(char::is_whitespace) {
            options.to_string()
        } else {
            format!(" {options}")
        };
        format!(
            "CREATE TABLE {} (\n  {}\n){}",
            quote_ident(Dialect::Sqlite, table),
            lines.join(",\n  "),
            options
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEOPLE: &str = "CREATE TABLE people (\n  id INTEGER PRIMARY KEY,\n  first TEXT COLLATE NOCASE,\n  \"last\" TEXT,\n  age INTEGER CHECK (age >= 0),\n  full TEXT GENERATED ALWAYS AS (first || ' ' || last) VIRTUAL,\n  note TEXT DEFAULT 'it''s',\n  UNIQUE (first, last)\n) WITHOUT ROWID";

    #[test]
    fn test_parse_elements() {
        let parsed = CreateTable::parse(PEOPLE).unwrap();
        assert_eq!(parsed.elements.len(), 7);
        assert!(parsed.elements[2].is_column("last"));
        assert_eq!(render(parsed.elements[1].tokens()), "first TEXT COLLATE NOCASE");
        assert_eq!(render(parsed.elements[5].tokens()), "note TEXT DEFAULT 'it''s'");
        assert!(matches!(
            parsed.elements[6],
            Element::Constraint {
                kind: ConstraintKind::Unique,
                ..
            }
        ));
        assert_eq!(parsed.elements[6].key_columns(), vec!["first", "last"]);
        assert_eq!(parsed.column_end(), 6);
        assert!(parsed.elements[0].has_inline_primary_key());
        assert!(parsed.render_with("people", &[]).ends_with(") WITHOUT ROWID"));
    }

    #[test]
    fn test_rename_refs_in_expressions() {
        let mut parsed = CreateTable::parse(PEOPLE).unwrap();
        for e in parsed.elements.iter_mut() {
            e.rename_refs("last", "surname");
        }
        assert_eq!(
            render(parsed.elements[4].tokens()),
            "full TEXT GENERATED ALWAYS AS (first || ' ' || \"surname\") VIRTUAL"
        );
        assert_eq!(parsed.elements[6].key_columns(), vec!["first", "surname"]);
    }

    #[test]
    fn test_rename_skips_references_and_functions() {
        let mut tokens = tokenize("owner INTEGER REFERENCES users (id) CHECK (id(owner) > 0 AND id > 1)").unwrap();
        rename_column_refs(&mut tokens, "id", "user_id", &[], true);
        assert_eq!(
            render(&tokens),
            "owner INTEGER REFERENCES users (id) CHECK (id(owner) > 0 AND \"user_id\" > 1)"
        );
    }

    #[test]
    fn test_rename_in_index_and_trigger() {
        assert_eq!(
            rename_in_index("CREATE INDEX name ON people (name, age) WHERE name IS NOT NULL", "name", "full_name")
                .unwrap(),
            "CREATE INDEX name ON people (\"full_name\", age) WHERE \"full_name\" IS NOT NULL"
        );
        let trigger = "CREATE TRIGGER t AFTER UPDATE OF name ON people BEGIN \
                       INSERT INTO log (name) VALUES (NEW.name); END";
        assert_eq!(
            rename_in_trigger(trigger, "people", "name", "full_name").unwrap(),
            "CREATE TRIGGER t AFTER UPDATE OF \"full_name\" ON people BEGIN \
             INSERT INTO log (name) VALUES (NEW.\"full_name\"); END"
        );
    }

    #[test]
    fn test_strip_inline_primary_key() {
        let mut parsed = CreateTable::parse(
            "CREATE TABLE t (id INTEGER CONSTRAINT pk PRIMARY KEY DESC ON CONFLICT REPLACE AUTOINCREMENT NOT NULL, b TEXT)",
        )
        .unwrap();
        parsed.elements[0].strip_inline_primary_key();
        assert_eq!(render(parsed.elements[0].tokens()), "id INTEGER  NOT NULL");
        assert!(!parsed.elements[0].has_inline_primary_key());
    }

    #[test]
    fn test_unparseable_text() {
        assert!(CreateTable::parse("CREATE TABLE t AS SELECT 1").is_none());
    }
}
