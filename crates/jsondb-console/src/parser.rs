use jsondb_core::query::{field, CompareOp, Predicate, Query};
use serde_json::{Map, Number, Value};

use crate::commands::FieldType;

/// Deepest predicate tree a query expression may build.
const MAX_DEPTH: usize = 128;

/// A lexical token of a query expression.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    Compare(CompareOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    And,
    Or,
    Tilde,
}

/// Tokenize a query expression.
///
/// Handles:
/// - Identifiers (`where`, attribute names, `true`, `None`, ...)
/// - Single- or double-quoted strings with backslash escapes
/// - Numbers, optionally negative, with fraction and exponent
/// - Operators: `==`, `!=`, `<`, `<=`, `>`, `>=`, `&`, `|`, `~`
/// - Punctuation: `(`, `)`, `[`, `]`, `.`, `,`
fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Quoted string.
        if c == '\'' || c == '"' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                if i >= len {
                    return Err("Unterminated quoted string".to_string());
                }
                match chars[i] {
                    '\\' if i + 1 < len => {
                        i += 1;
                        text.push(match chars[i] {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    ch if ch == quote => {
                        i += 1;
                        break;
                    }
                    ch => text.push(ch),
                }
                i += 1;
            }
            tokens.push(Token::Str(text));
            continue;
        }

        // Number.
        if c.is_ascii_digit() || (c == '-' && i + 1 < len && chars[i + 1].is_ascii_digit()) {
            let start = i;
            i += 1;
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < len && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < len && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < len && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < len && chars[j].is_ascii_digit() {
                    i = j;
                    while i < len && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
            continue;
        }

        // Identifier.
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        // Two-character comparison operators.
        let next = chars.get(i + 1).copied();
        let two = match (c, next) {
            ('=', Some('=')) => Some(CompareOp::Eq),
            ('!', Some('=')) => Some(CompareOp::Ne),
            ('<', Some('=')) => Some(CompareOp::Le),
            ('>', Some('=')) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = two {
            tokens.push(Token::Compare(op));
            i += 2;
            continue;
        }

        let token = match c {
            '<' => Token::Compare(CompareOp::Lt),
            '>' => Token::Compare(CompareOp::Gt),
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '.' => Token::Dot,
            ',' => Token::Comma,
            '&' => Token::And,
            '|' => Token::Or,
            '~' => Token::Tilde,
            other => return Err(format!("Unexpected character '{other}' in query")),
        };
        tokens.push(token);
        i += 1;
    }

    Ok(tokens)
}

/// Parse a query expression such as
/// `where('name') == 'John' & (where('score') < 18)` into a predicate.
///
/// Precedence, loosest first: `|`, `&`, `~`, then comparisons. A `where`
/// path with nothing attached parses to an incomplete query, which fails
/// when evaluated.
pub fn parse_query(input: &str) -> Result<Predicate, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty query expression".to_string());
    }

    let mut parser = ExprParser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let predicate = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(format!("Unexpected {} after end of query", describe(tok)));
    }
    Ok(predicate)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl ExprParser {
    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("Query nests deeper than {MAX_DEPTH} levels"));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, wanted: Token) -> Result<(), String> {
        match self.advance() {
            Some(tok) if tok == wanted => Ok(()),
            Some(tok) => Err(format!("Expected {}, found {}", describe(&wanted), describe(&tok))),
            None => Err(format!("Expected {}, found end of query", describe(&wanted))),
        }
    }

    fn expect_str(&mut self) -> Result<String, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s),
            Some(tok) => Err(format!("Expected quoted string, found {}", describe(&tok))),
            None => Err("Expected quoted string, found end of query".to_string()),
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, String> {
        let start = self.depth;
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            self.descend()?;
            left = left | self.parse_and()?;
        }
        self.depth = start;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, String> {
        let start = self.depth;
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            self.descend()?;
            left = left & self.parse_unary()?;
        }
        self.depth = start;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Predicate, String> {
        if self.peek() == Some(&Token::Tilde) {
            self.advance();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(!inner);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, String> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "where" => self.parse_leaf(),
            Some(tok) => Err(format!("Expected where(...) or '(', found {}", describe(tok))),
            None => Err("Unexpected end of query".to_string()),
        }
    }

    /// `where('a')` followed by path segments and at most one test.
    fn parse_leaf(&mut self) -> Result<Predicate, String> {
        self.advance();
        self.expect(Token::LParen)?;
        let mut query = field(self.expect_str()?);
        self.expect(Token::RParen)?;

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        Some(tok) => return Err(format!("Expected attribute name, found {}", describe(&tok))),
                        None => return Err("Expected attribute name, found end of query".to_string()),
                    };
                    if self.peek() == Some(&Token::LParen) {
                        return self.parse_method(&query, &name);
                    }
                    query = query.field(name);
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let segment = match self.advance() {
                        Some(Token::Str(s)) | Some(Token::Number(s)) => s,
                        Some(tok) => return Err(format!("Expected index key, found {}", describe(&tok))),
                        None => return Err("Expected index key, found end of query".to_string()),
                    };
                    self.expect(Token::RBracket)?;
                    query = query.index(segment);
                }
                Some(Token::Compare(op)) => {
                    let op = *op;
                    self.advance();
                    let value = self.parse_literal()?;
                    return compare(&query, op, value);
                }
                _ => return Ok(Predicate::from(query)),
            }
        }
    }

    fn parse_method(&mut self, query: &Query, name: &str) -> Result<Predicate, String> {
        self.expect(Token::LParen)?;
        let predicate = match name {
            "exists" => query.exists(),
            "search" => {
                let pattern = self.expect_str()?;
                let flags = if self.peek() == Some(&Token::Comma) {
                    self.advance();
                    self.expect_str()?
                } else {
                    String::new()
                };
                query.search(&pattern, &flags)
            }
            other => return Err(format!("Unknown query method '{other}'")),
        };
        self.expect(Token::RParen)?;
        predicate.map_err(|e| e.to_string())
    }

    fn parse_literal(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Number(n)) => parse_number(&n),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Value::Bool(true)),
                "false" | "False" => Ok(Value::Bool(false)),
                "null" | "None" => Ok(Value::Null),
                other => Err(format!("Unknown literal '{other}'")),
            },
            Some(tok) => Err(format!("Expected a literal value, found {}", describe(&tok))),
            None => Err("Expected a literal value, found end of query".to_string()),
        }
    }
}

fn compare(query: &Query, op: CompareOp, value: Value) -> Result<Predicate, String> {
    let built = match op {
        CompareOp::Eq => query.eq(value),
        CompareOp::Ne => query.ne(value),
        CompareOp::Lt => query.lt(value),
        CompareOp::Le => query.le(value),
        CompareOp::Gt => query.gt(value),
        CompareOp::Ge => query.ge(value),
    };
    built.map_err(|e| e.to_string())
}

fn parse_number(text: &str) -> Result<Value, String> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("Invalid number '{text}'"))
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => format!("'{s}'"),
        Token::Str(s) => format!("string '{s}'"),
        Token::Number(n) => format!("number {n}"),
        Token::Compare(op) => format!("'{}'", op.symbol()),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::Dot => "'.'".to_string(),
        Token::Comma => "','".to_string(),
        Token::And => "'&'".to_string(),
        Token::Or => "'|'".to_string(),
        Token::Tilde => "'~'".to_string(),
    }
}

/// Parse a field type name (case-insensitive).
fn parse_field_type(s: &str) -> Result<FieldType, String> {
    match s.to_lowercase().as_str() {
        "str" | "string" => Ok(FieldType::Str),
        "int" | "integer" => Ok(FieldType::Int),
        "float" => Ok(FieldType::Float),
        "bool" | "boolean" => Ok(FieldType::Bool),
        "null" | "none" => Ok(FieldType::Null),
        "json" => Ok(FieldType::Json),
        _ => Err(format!(
            "Invalid field type '{s}'. Expected str, int, float, bool, null, or json."
        )),
    }
}

/// Convert the raw text of a record item to a value of the declared type.
fn convert_value(raw: &str, ty: FieldType) -> Result<Value, String> {
    match ty {
        FieldType::Str => Ok(Value::String(raw.to_string())),
        FieldType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{raw}' is not a valid int")),
        FieldType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("'{raw}' is not a valid float")),
        FieldType::Bool => match raw.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{raw}' is not a valid bool")),
        },
        FieldType::Null => Ok(Value::Null),
        FieldType::Json => serde_json::from_str(raw).map_err(|e| format!("'{raw}' is not valid JSON: {e}")),
    }
}

/// Parse one `FIELD:VALUE:TYPE` item.
///
/// The field name ends at the first `:` and the type starts after the last
/// one, so values may themselves contain colons.
pub fn parse_field_item(item: &str) -> Result<(String, Value), String> {
    let Some((name, rest)) = item.split_once(':') else {
        return Err(format!("Invalid field '{item}'. Expected FIELD:VALUE:TYPE."));
    };
    let Some((raw, ty)) = rest.rsplit_once(':') else {
        return Err(format!("Invalid field '{item}'. Expected FIELD:VALUE:TYPE."));
    };
    if name.is_empty() {
        return Err(format!("Invalid field '{item}'. Field name is empty."));
    }

    let value = convert_value(raw, parse_field_type(ty)?)?;
    Ok((name.to_string(), value))
}

/// Parse a list of `FIELD:VALUE:TYPE` items into one document.
///
/// A repeated field keeps its last value.
pub fn parse_record(items: &[String]) -> Result<Value, String> {
    let mut record = Map::new();
    for item in items {
        let (name, value) = parse_field_item(item)?;
        record.insert(name, value);
    }
    Ok(Value::Object(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsondb_core::error::QueryError;
    use jsondb_core::types::Fields;
    use serde_json::json;

    fn doc(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    fn matches(expr: &str, value: Value) -> bool {
        parse_query(expr).unwrap().eval(&doc(value)).unwrap()
    }

    // ---- Record items ----

    #[test]
    fn test_record_basic_types() {
        let items: Vec<String> = [
            "name:John:str",
            "surname:Snow:string",
            "score:16:int",
            "ratio:0.5:float",
            "active:true:bool",
            "nick::null",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(
            parse_record(&items).unwrap(),
            json!({
                "name": "John",
                "surname": "Snow",
                "score": 16,
                "ratio": 0.5,
                "active": true,
                "nick": null
            })
        );
    }

    #[test]
    fn test_record_value_with_colons() {
        let (name, value) = parse_field_item("url:http://x.com:8080:str").unwrap();
        assert_eq!(name, "url");
        assert_eq!(value, json!("http://x.com:8080"));
    }

    #[test]
    fn test_record_json_type() {
        let (_, value) = parse_field_item(r#"tags:["a", "b"]:json"#).unwrap();
        assert_eq!(value, json!(["a", "b"]));
    }

    #[test]
    fn test_record_errors() {
        assert!(parse_field_item("name").is_err());
        assert!(parse_field_item("name:John").is_err());
        assert!(parse_field_item(":John:str").is_err());
        assert!(parse_field_item("score:abc:int").is_err());
        assert!(parse_field_item("flag:maybe:bool").is_err());
        assert!(parse_field_item("x:1:complex").is_err());
    }

    #[test]
    fn test_record_type_case_insensitive() {
        let (_, value) = parse_field_item("n:7:INT").unwrap();
        assert_eq!(value, json!(7));
    }

    // ---- Query expressions ----

    #[test]
    fn test_simple_comparison() {
        assert!(matches("where('name') == 'John'", json!({"name": "John"})));
        assert!(!matches("where('name') == 'John'", json!({"name": "Bob"})));
        assert!(matches("where(\"score\") < 18", json!({"score": 16})));
        assert!(matches("where('score') >= 16.0", json!({"score": 16})));
        assert!(matches("where('t') != -3", json!({"t": 3})));
    }

    #[test]
    fn test_combinators_and_parens() {
        let expr = "where('name') == 'John' & (where('score') < 18)";
        assert!(matches(expr, json!({"name": "John", "score": 16})));
        assert!(!matches(expr, json!({"name": "John", "score": 20})));

        let expr = "(where('a') == 1) | (where('b') == 2)";
        assert!(matches(expr, json!({"b": 2})));
        assert!(!matches(expr, json!({"a": 2, "b": 1})));

        assert!(matches("~(where('a') == 1)", json!({"a": 2})));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = "where('a') == 1 | where('b') == 1 & where('c') == 1";
        assert!(matches(expr, json!({"a": 1})));
        assert!(!matches(expr, json!({"b": 1})));
    }

    #[test]
    fn test_parsed_equals_built() {
        let parsed = parse_query("(where('y') == 2) & (where('x') == 1)").unwrap();
        let built = field("x").eq(1).unwrap() & field("y").eq(2).unwrap();
        assert_eq!(parsed, built);
    }

    #[test]
    fn test_nested_paths() {
        let value = json!({"address": {"city": "Portland", "geo": {"zip": "97201"}}});
        assert!(matches("where('address').city == 'Portland'", value.clone()));
        assert!(matches("where('address')['geo'].zip == '97201'", value.clone()));
        assert!(!matches("where('address').city.name == 'x'", value));
    }

    #[test]
    fn test_literals() {
        assert!(matches("where('a') == True", json!({"a": true})));
        assert!(matches("where('a') == false", json!({"a": false})));
        assert!(matches("where('a') == None", json!({"a": null})));
        assert!(matches("where('a') == 1e3", json!({"a": 1000})));
        assert!(matches("where('a') == 'it\\'s'", json!({"a": "it's"})));
    }

    #[test]
    fn test_methods() {
        assert!(matches("where('a').exists()", json!({"a": null})));
        assert!(!matches("where('a').exists()", json!({"b": 1})));
        assert!(matches("where('name').search('^jo')", json!({"name": "john"})));
        assert!(!matches("where('name').search('^jo')", json!({"name": "John"})));
        assert!(matches("where('name').search('^jo', 'i')", json!({"name": "John"})));
    }

    #[test]
    fn test_bare_path_fails_on_evaluation() {
        let predicate = parse_query("where('a')").unwrap();
        assert!(matches!(
            predicate.eval(&doc(json!({"a": 1}))),
            Err(QueryError::EmptyQuery)
        ));
    }

    #[test]
    fn test_query_syntax_errors() {
        assert!(parse_query("").is_err());
        assert!(parse_query("where('a') ==").is_err());
        assert!(parse_query("where(a) == 1").is_err());
        assert!(parse_query("(where('a') == 1").is_err());
        assert!(parse_query("where('a') == 1 where('b') == 2").is_err());
        assert!(parse_query("where('a') == 'unterminated").is_err());
        assert!(parse_query("where('a') == bogus").is_err());
        assert!(parse_query("where('a').frobnicate()").is_err());
        assert!(parse_query("where('a').search('(')").is_err());
        assert!(parse_query("where('a').search('x', 'q')").is_err());
        assert!(parse_query("__import__('os')").is_err());
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let leaf = "where('a') == 1";
        let tildes = format!("{}{leaf}", "~".repeat(100_000));
        assert!(parse_query(&tildes).unwrap_err().contains("deeper"));

        let parens = format!("{}{leaf}{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(parse_query(&parens).unwrap_err().contains("deeper"));

        let chain = vec![leaf; 100_000].join(" & ");
        assert!(parse_query(&chain).unwrap_err().contains("deeper"));

        let shallow = format!("{}{leaf}{}", "~(".repeat(32), ")".repeat(32));
        assert!(parse_query(&shallow).is_ok());
    }
}
