//! Formula text to expression tree (tokenizer + recursive descent).
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! comparison := concat (("=" | "<>" | "<" | ">" | "<=" | ">=") concat)*
//! concat     := additive ("&" additive)*
//! additive   := term (("+" | "-") term)*
//! term       := power (("*" | "/") power)*
//! power      := unary ("^" unary)*
//! unary      := ("-" | "+") unary | postfix
//! postfix    := primary "%"*
//! primary    := NUMBER | STRING | TRUE | FALSE
//!             | [SHEET "!"] CELL [":" CELL]
//!             | NAME "(" [arg ("," arg)*] ")"
//!             | "(" comparison ")"
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Zero-based single cell reference; `sheet` is `None` for the current sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRef {
    pub sheet: Option<String>,
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeRef {
    pub sheet: Option<String>,
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Omitted function argument, as in `ROUND(A1,)`.
    Missing,
    Reference(CellRef),
    Range(RangeRef),
    Negate(Box<Expr>),
    Percent(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Function call; `name` is upper-cased with any `_xlfn.` prefix removed.
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Sheet(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Amp,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Comma,
    Colon,
    LParen,
    RParen,
}

/// Parses formula text (with or without a leading `=`).
pub fn parse_formula(input: &str) -> Result<Expr, String> {
    let text = input.trim();
    let text = text.strip_prefix('=').unwrap_or(text);
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err("empty formula".to_string());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.comparison()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {:?} after expression", token));
    }
    Ok(expr)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        // String literal, "" is an escaped quote
        if ch == '"' {
            chars.next();
            let mut buf = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        buf.push('"');
                        chars.next();
                        continue;
                    }
                    closed = true;
                    break;
                }
                buf.push(c);
            }
            if !closed {
                return Err("unterminated string literal".to_string());
            }
            tokens.push(Token::Text(buf));
            continue;
        }

        // Quoted sheet name: 'My Sheet'!A1
        if ch == '\'' {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        name.push('\'');
                        chars.next();
                        continue;
                    }
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed || chars.next() != Some('!') {
                return Err("malformed quoted sheet reference".to_string());
            }
            tokens.push(Token::Sheet(name));
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            let mut buf = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    buf.push(c);
                    chars.next();
                } else if (c == 'e' || c == 'E') && !buf.is_empty() {
                    buf.push(c);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            buf.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let n = buf
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{}'", buf))?;
            tokens.push(Token::Number(n));
            continue;
        }

        if is_ident_start(ch) {
            let mut buf = String::new();
            while let Some(&c) = chars.peek() {
                if is_ident_char(c) {
                    buf.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek() == Some(&'!') {
                chars.next();
                tokens.push(Token::Sheet(buf));
            } else {
                tokens.push(Token::Ident(buf));
            }
            continue;
        }

        chars.next();
        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '&' => Token::Amp,
            '%' => Token::Percent,
            '=' => Token::Eq,
            ',' | ';' => Token::Comma,
            ':' => Token::Colon,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '<' => match chars.peek() {
                Some('=') => {
                    chars.next();
                    Token::Le
                }
                Some('>') => {
                    chars.next();
                    Token::Ne
                }
                _ => Token::Lt,
            },
            '>' => match chars.peek() {
                Some('=') => {
                    chars.next();
                    Token::Ge
                }
                _ => Token::Gt,
            },
            other => return Err(format!("unexpected character '{}'", other)),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.concat()?;
            left = binary(op, left, right);
        }
    }

    fn concat(&mut self) -> Result<Expr, String> {
        let mut left = self.additive()?;
        while self.eat(&Token::Amp) {
            let right = self.additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.power()?;
            left = binary(op, left, right);
        }
    }

    fn power(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.eat(&Token::Caret) {
            let right = self.unary()?;
            left = binary(BinaryOp::Pow, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        while self.eat(&Token::Percent) {
            expr = Expr::Percent(Box::new(expr));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing ')'".to_string());
                }
                Ok(inner)
            }
            Some(Token::Sheet(sheet)) => match self.next() {
                Some(Token::Ident(cell)) => self.reference(Some(sheet), &cell),
                other => Err(format!("expected cell after sheet '{}', got {:?}", sheet, other)),
            },
            Some(Token::Ident(ident)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    return self.call(&ident);
                }
                if ident.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Bool(true));
                }
                if ident.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Bool(false));
                }
                self.reference(None, &ident)
            }
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of formula".to_string()),
        }
    }

    fn reference(&mut self, sheet: Option<String>, start: &str) -> Result<Expr, String> {
        let (start_row, start_col) =
            parse_a1(start).ok_or_else(|| format!("unknown name '{}'", start))?;

        if !self.eat(&Token::Colon) {
            return Ok(Expr::Reference(CellRef {
                sheet,
                row: start_row,
                col: start_col,
            }));
        }

        let end = match self.next() {
            Some(Token::Ident(end)) => end,
            other => return Err(format!("expected range end, got {:?}", other)),
        };
        let (end_row, end_col) = parse_a1(&end).ok_or_else(|| format!("invalid range end '{}'", end))?;

        Ok(Expr::Range(RangeRef {
            sheet,
            start_row: start_row.min(end_row),
            start_col: start_col.min(end_col),
            end_row: start_row.max(end_row),
            end_col: start_col.max(end_col),
        }))
    }

    fn call(&mut self, raw_name: &str) -> Result<Expr, String> {
        let upper = raw_name.to_uppercase();
        let name = upper.strip_prefix("_XLFN.").unwrap_or(&upper).to_string();
        let mut args = Vec::new();

        if self.eat(&Token::RParen) {
            return Ok(Expr::Call { name, args });
        }

        loop {
            let arg = match self.peek() {
                Some(Token::Comma) | Some(Token::RParen) => Expr::Missing,
                _ => self.comparison()?,
            };
            args.push(arg);

            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => return Err(format!("expected ',' or ')' in {}(), got {:?}", name, other)),
            }
        }

        Ok(Expr::Call { name, args })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// `A1`, `$B$2`, `xfd1048576` to zero-based (row, col).
pub fn parse_a1(s: &str) -> Option<(usize, usize)> {
    let s = s.trim();
    let bytes = s.as_bytes();
    let mut i = 0;

    if bytes.get(i) == Some(&b'$') {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = &s[col_start..i];
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }

    if bytes.get(i) == Some(&b'$') {
        i += 1;
    }
    let digits = &s[i..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut col = 0usize;
    for b in letters.bytes() {
        col = col * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 || row > 1_048_576 || col > 16_384 {
        return None;
    }

    Some((row - 1, col - 1))
}
