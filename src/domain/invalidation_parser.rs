//! Invalidation condition parser.
//!
//! Recursive descent over a small, forgiving grammar so that the phrasing a
//! model naturally produces ("price closes below $98,500 on 3m") parses as
//! well as the terse form (`price < 98500`). Matching is case-insensitive.
//!
//! ```text
//! expr       := and_expr (("or" | "||") and_expr)*
//! and_expr   := clause (("and" | "&&") clause)*
//! clause     := "(" expr ")" | call | comparison
//! call       := ("ABOVE" | "BELOW") "(" operand "," operand ")"
//! comparison := operand verb* comparator operand
//! operand    := number | "$"number | price | close | mark
//!             | EMA n | RSI n | ATR n | MACD | MACD_SIGNAL | MACD_HISTOGRAM
//! ```
//!
//! A trailing `on ...` qualifier is accepted and ignored.

use crate::domain::error::ParseError;
use crate::domain::indicator::{IndicatorField, IndicatorType};
use crate::domain::invalidation::{IndicatorRef, Operand, Rule};

const VERBS: &[&str] = &[
    "closes", "close", "trades", "falls", "drops", "rises", "moves", "breaks", "goes", "is",
    "crosses",
];

#[derive(Debug, Clone, Copy)]
enum Comparator {
    Below,
    AtOrBelow,
    Above,
    AtOrAbove,
}

struct Parser {
    input: String,
    pos: usize,
    call_depth: usize,
    macd: (usize, usize, usize),
}

impl Parser {
    fn new(input: &str, macd: (usize, usize, usize)) -> Self {
        Self {
            input: input.to_ascii_lowercase(),
            pos: 0,
            call_depth: 0,
            macd,
        }
    }

    fn remaining(&self) -> &str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        self.skip_whitespace();
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    /// Digits with an optional fraction. Outside call arguments, a comma
    /// followed by exactly three digits is a thousands separator.
    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut text = String::new();
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            text.push('-');
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                text.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && self.digit_at(1) {
                has_dot = true;
                text.push(ch);
                self.advance();
            } else if ch == ',' && !has_dot && digits > 0 && self.is_thousands_group() {
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        text.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", text),
            position: start,
        })
    }

    fn digit_at(&self, offset: usize) -> bool {
        self.remaining()
            .chars()
            .nth(offset)
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn is_thousands_group(&self) -> bool {
        if self.call_depth > 0 {
            return false;
        }
        let rest = &self.remaining()[1..];
        let group: Vec<char> = rest.chars().take(4).collect();
        group.len() >= 3
            && group[..3].iter().all(|c| c.is_ascii_digit())
            && !group.get(3).is_some_and(|c| c.is_ascii_digit())
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let digits: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        if digits.is_empty() {
            return Err(ParseError {
                message: "expected period".to_string(),
                position: start,
            });
        }
        self.pos += digits.len();

        match digits.parse::<usize>() {
            Ok(0) | Err(_) => Err(ParseError {
                message: format!("invalid period: {}", digits),
                position: start,
            }),
            Ok(n) => Ok(n),
        }
    }

    /// `EMA20`, `EMA_20`, `EMA(20)` or `EMA 20`; `word` has already been
    /// consumed and starts with the three-letter indicator name.
    fn parse_period(&mut self, word: &str, word_start: usize) -> Result<usize, ParseError> {
        let suffix = word[3..].trim_start_matches('_');
        if !suffix.is_empty() {
            return match suffix.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(ParseError {
                    message: format!("invalid indicator '{}'", word),
                    position: word_start,
                }),
            };
        }

        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.advance();
            let period = self.parse_integer()?;
            self.expect_char(')')?;
            Ok(period)
        } else {
            self.parse_integer()
        }
    }

    fn indicator(&self, indicator_type: IndicatorType, field: IndicatorField) -> Operand {
        Operand::Indicator(IndicatorRef {
            indicator_type,
            field,
        })
    }

    fn macd_operand(&self, field: IndicatorField) -> Operand {
        let (fast, slow, signal) = self.macd;
        self.indicator(IndicatorType::Macd { fast, slow, signal }, field)
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self.peek() == Some('$') {
            self.advance();
            return Ok(Operand::Constant(self.parse_number()?));
        }

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            return Ok(Operand::Constant(self.parse_number()?));
        }

        let start = self.pos;
        let word = self.peek_word();
        if !word.starts_with(|c: char| c.is_alphabetic()) {
            return Err(self.error(format!("expected operand, found '{}'", word)));
        }

        match word.as_str() {
            "price" | "close" => {
                self.pos += word.len();
                Ok(Operand::Price)
            }
            "mark" => {
                self.pos += word.len();
                self.consume_keyword("price");
                Ok(Operand::Price)
            }
            "macd_signal" => {
                self.pos += word.len();
                Ok(self.macd_operand(IndicatorField::MacdSignal))
            }
            "macd_histogram" | "macd_hist" => {
                self.pos += word.len();
                Ok(self.macd_operand(IndicatorField::MacdHistogram))
            }
            "macd" => {
                self.pos += word.len();
                if self.consume_keyword("signal") {
                    Ok(self.macd_operand(IndicatorField::MacdSignal))
                } else if self.consume_keyword("histogram") {
                    Ok(self.macd_operand(IndicatorField::MacdHistogram))
                } else {
                    Ok(self.macd_operand(IndicatorField::MacdLine))
                }
            }
            w if w.starts_with("ema") || w.starts_with("rsi") || w.starts_with("atr") => {
                self.pos += word.len();
                let period = self.parse_period(&word, start)?;
                let indicator_type = match &word[..3] {
                    "ema" => IndicatorType::Ema(period),
                    "rsi" => IndicatorType::Rsi(period),
                    _ => IndicatorType::Atr(period),
                };
                Ok(self.indicator(indicator_type, IndicatorField::Value))
            }
            _ => Err(self.error(format!("expected operand, found '{}'", word))),
        }
    }

    fn parse_comparator(&mut self) -> Result<Comparator, ParseError> {
        self.skip_whitespace();
        if self.consume_exact("<=") {
            return Ok(Comparator::AtOrBelow);
        }
        if self.consume_exact(">=") {
            return Ok(Comparator::AtOrAbove);
        }
        if self.consume_exact("<") {
            return Ok(Comparator::Below);
        }
        if self.consume_exact(">") {
            return Ok(Comparator::Above);
        }
        for (keyword, comparator) in [
            ("below", Comparator::Below),
            ("under", Comparator::Below),
            ("above", Comparator::Above),
            ("over", Comparator::Above),
        ] {
            if self.consume_keyword(keyword) {
                return Ok(comparator);
            }
        }
        let word = self.peek_word();
        Err(self.error(format!("expected comparator, found '{}'", word)))
    }

    fn parse_comparison(&mut self) -> Result<Rule, ParseError> {
        let left = self.parse_operand()?;
        while VERBS.iter().any(|verb| self.consume_keyword(verb)) {}
        let comparator = self.parse_comparator()?;
        let right = self.parse_operand()?;

        Ok(match comparator {
            Comparator::Below => Rule::Below { left, right },
            Comparator::AtOrBelow => Rule::AtOrBelow { left, right },
            Comparator::Above => Rule::Above { left, right },
            Comparator::AtOrAbove => Rule::AtOrAbove { left, right },
        })
    }

    fn parse_call(&mut self, keyword: &str) -> Result<Rule, ParseError> {
        self.consume_keyword(keyword);
        self.expect_char('(')?;
        self.call_depth += 1;

        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;
        self.call_depth -= 1;

        match keyword {
            "above" => Ok(Rule::Above { left, right }),
            _ => Ok(Rule::Below { left, right }),
        }
    }

    fn followed_by_paren(&self, keyword: &str) -> bool {
        self.peek_keyword(keyword) && self.remaining()[keyword.len()..].trim_start().starts_with('(')
    }

    fn parse_clause(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();

        if self.peek() == Some('(') {
            self.advance();
            let rule = self.parse_expr()?;
            self.expect_char(')')?;
            return Ok(rule);
        }

        for keyword in ["above", "below"] {
            if self.followed_by_paren(keyword) {
                return self.parse_call(keyword);
            }
        }

        self.parse_comparison()
    }

    fn parse_and(&mut self) -> Result<Rule, ParseError> {
        let mut rules = vec![self.parse_clause()?];
        while self.consume_keyword("and") || self.consume_exact("&&") {
            rules.push(self.parse_clause()?);
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::And(rules)
        })
    }

    fn parse_expr(&mut self) -> Result<Rule, ParseError> {
        let mut rules = vec![self.parse_and()?];
        while self.consume_keyword("or") || self.consume_exact("||") {
            rules.push(self.parse_and()?);
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::Or(rules)
        })
    }

    fn parse(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();
        if self.remaining().is_empty() {
            return Err(self.error("empty condition"));
        }

        let rule = self.parse_expr()?;

        if self.consume_keyword("on") {
            self.pos = self.input.len();
        }
        while self.peek().is_some_and(|c| c.is_whitespace() || c == '.') {
            self.advance();
        }
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after condition: '{}'",
                self.remaining()
            )));
        }
        Ok(rule)
    }
}

/// Parse an invalidation condition. MACD operands use `macd` as
/// `(fast, slow, signal)`.
pub fn parse(input: &str, macd: (usize, usize, usize)) -> Result<Rule, ParseError> {
    Parser::new(input, macd).parse()
}
