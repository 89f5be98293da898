//! Feature mnemonic parsing.
//!
//! A mnemonic such as `LAG1_PRMA10_AdjClose` decomposes into at most one
//! manipulation (`LAG1`), at most one window transform (`PRMA10`) and exactly
//! one base data column (`AdjClose`). Tokens are split on underscores and on
//! letter/digit boundaries and consumed greedily left to right.

use crate::domain::error::FeatureParseError;
use std::fmt;

/// Price fields available both adjusted (`AdjClose`) and raw (`RClose`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Vwap,
    Volume,
}

impl PriceField {
    pub const ALL: [PriceField; 6] = [
        PriceField::Open,
        PriceField::High,
        PriceField::Low,
        PriceField::Close,
        PriceField::Vwap,
        PriceField::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PriceField::Open => "Open",
            PriceField::High => "High",
            PriceField::Low => "Low",
            PriceField::Close => "Close",
            PriceField::Vwap => "Vwap",
            PriceField::Volume => "Volume",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        PriceField::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Columns that carry no split/dividend adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlainColumn {
    AvgDolVol,
    MarketCap,
    SplitFactor,
    Dividend,
    EarningsFlag,
}

impl PlainColumn {
    pub const ALL: [PlainColumn; 5] = [
        PlainColumn::AvgDolVol,
        PlainColumn::MarketCap,
        PlainColumn::SplitFactor,
        PlainColumn::Dividend,
        PlainColumn::EarningsFlag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PlainColumn::AvgDolVol => "AvgDolVol",
            PlainColumn::MarketCap => "MarketCap",
            PlainColumn::SplitFactor => "SplitFactor",
            PlainColumn::Dividend => "Dividend",
            PlainColumn::EarningsFlag => "EarningsFlag",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        PlainColumn::ALL.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseColumn {
    Adjusted(PriceField),
    Raw(PriceField),
    Plain(PlainColumn),
}

impl BaseColumn {
    /// Column name in the pricing table.
    pub fn column_name(self) -> String {
        match self {
            BaseColumn::Adjusted(field) => format!("Adj{}", field.name()),
            BaseColumn::Raw(field) => field.name().to_string(),
            BaseColumn::Plain(col) => col.name().to_string(),
        }
    }

    /// Canonical mnemonic spelling.
    pub fn mnemonic(self) -> String {
        match self {
            BaseColumn::Adjusted(field) => format!("Adj{}", field.name()),
            BaseColumn::Raw(field) => format!("R{}", field.name()),
            BaseColumn::Plain(col) => col.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manipulation {
    Lag(usize),
    Lead(usize),
    Rank(usize),
}

impl Manipulation {
    pub fn keyword(self) -> &'static str {
        match self {
            Manipulation::Lag(_) => "LAG",
            Manipulation::Lead(_) => "LEAD",
            Manipulation::Rank(_) => "RANK",
        }
    }

    pub fn arg(self) -> usize {
        match self {
            Manipulation::Lag(n) | Manipulation::Lead(n) | Manipulation::Rank(n) => n,
        }
    }

    pub fn is_forward_looking(self) -> bool {
        matches!(self, Manipulation::Lead(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowVariable {
    Ma(usize),
    Prma(usize),
    Vol(usize),
    Boll(usize),
}

impl WindowVariable {
    pub fn keyword(self) -> &'static str {
        match self {
            WindowVariable::Ma(_) => "MA",
            WindowVariable::Prma(_) => "PRMA",
            WindowVariable::Vol(_) => "VOL",
            WindowVariable::Boll(_) => "BOLL",
        }
    }

    pub fn length(self) -> usize {
        match self {
            WindowVariable::Ma(n)
            | WindowVariable::Prma(n)
            | WindowVariable::Vol(n)
            | WindowVariable::Boll(n) => n,
        }
    }
}

/// Parsed form of a feature mnemonic. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureDescriptor {
    /// The mnemonic as requested; used as the output column name.
    pub mnemonic: String,
    pub base: BaseColumn,
    pub manipulation: Option<Manipulation>,
    pub window: Option<WindowVariable>,
}

impl FeatureDescriptor {
    pub fn manipulation_arg(&self) -> Option<usize> {
        self.manipulation.map(Manipulation::arg)
    }

    pub fn window_length(&self) -> Option<usize> {
        self.window.map(WindowVariable::length)
    }

    /// Canonical spelling, e.g. `RClose` for a raw close or `AdjClose` for `Close`.
    pub fn canonical(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(m) = self.manipulation {
            parts.push(format!("{}{}", m.keyword(), m.arg()));
        }
        if let Some(w) = self.window {
            parts.push(format!("{}{}", w.keyword(), w.length()));
        }
        parts.push(self.base.mnemonic());
        parts.join("_")
    }
}

impl fmt::Display for FeatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token<'a> {
    text: &'a str,
    position: usize,
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut prev_digit = false;

    for (i, ch) in input.char_indices() {
        if ch == '_' {
            if let Some(s) = start.take() {
                tokens.push(Token {
                    text: &input[s..i],
                    position: s,
                });
            }
            continue;
        }
        let is_digit = ch.is_ascii_digit();
        match start {
            Some(s) if is_digit != prev_digit => {
                tokens.push(Token {
                    text: &input[s..i],
                    position: s,
                });
                start = Some(i);
            }
            None => start = Some(i),
            _ => {}
        }
        prev_digit = is_digit;
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: &input[s..],
            position: s,
        });
    }
    tokens
}

struct MnemonicParser<'a> {
    input: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> MnemonicParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            tokens: tokenize(input),
            pos: 0,
        }
    }

    fn error(&self, message: String, position: usize) -> FeatureParseError {
        FeatureParseError {
            mnemonic: self.input.to_string(),
            message,
            position,
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn end_position(&self) -> usize {
        self.input.len()
    }

    fn expect_integer(&mut self, keyword: &str) -> Result<usize, FeatureParseError> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => {
                return Err(self.error(
                    format!("expected integer after {}, found end of input", keyword),
                    self.end_position(),
                ));
            }
        };
        let value: usize = token.text.parse().map_err(|_| {
            self.error(
                format!("expected integer after {}, found '{}'", keyword, token.text),
                token.position,
            )
        })?;
        if value == 0 {
            return Err(self.error(
                format!("{} argument must be positive", keyword),
                token.position,
            ));
        }
        self.pos += 1;
        Ok(value)
    }

    fn parse_manipulation(&mut self) -> Result<Option<Manipulation>, FeatureParseError> {
        let keyword = match self.peek() {
            Some(t) if matches!(t.text, "LAG" | "LEAD" | "RANK") => t.text,
            _ => return Ok(None),
        };
        self.pos += 1;
        let arg = self.expect_integer(keyword)?;
        Ok(Some(match keyword {
            "LAG" => Manipulation::Lag(arg),
            "LEAD" => Manipulation::Lead(arg),
            _ => Manipulation::Rank(arg),
        }))
    }

    fn parse_window(&mut self) -> Result<Option<WindowVariable>, FeatureParseError> {
        let keyword = match self.peek() {
            Some(t) if matches!(t.text, "MA" | "PRMA" | "VOL" | "BOLL") => t.text,
            _ => return Ok(None),
        };
        self.pos += 1;
        let length = self.expect_integer(keyword)?;
        Ok(Some(match keyword {
            "MA" => WindowVariable::Ma(length),
            "PRMA" => WindowVariable::Prma(length),
            "VOL" => WindowVariable::Vol(length),
            _ => WindowVariable::Boll(length),
        }))
    }

    fn parse_base(&mut self) -> Result<BaseColumn, FeatureParseError> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => {
                return Err(self.error(
                    "expected base column, found end of input".to_string(),
                    self.end_position(),
                ));
            }
        };

        let base = if let Some(col) = PlainColumn::from_name(token.text) {
            BaseColumn::Plain(col)
        } else if let Some(field) = PriceField::from_name(token.text) {
            BaseColumn::Adjusted(field)
        } else if let Some(field) = token.text.strip_prefix("Adj").and_then(PriceField::from_name)
        {
            BaseColumn::Adjusted(field)
        } else if let Some(field) = token.text.strip_prefix('R').and_then(PriceField::from_name) {
            BaseColumn::Raw(field)
        } else {
            return Err(self.error(
                format!("unknown base column '{}'", token.text),
                token.position,
            ));
        };
        self.pos += 1;
        Ok(base)
    }

    fn parse(mut self) -> Result<FeatureDescriptor, FeatureParseError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty feature mnemonic".to_string(), 0));
        }
        let manipulation = self.parse_manipulation()?;
        let window = self.parse_window()?;
        let base = self.parse_base()?;

        if let Some(extra) = self.peek() {
            return Err(self.error(
                format!("unexpected trailing token '{}'", extra.text),
                extra.position,
            ));
        }

        Ok(FeatureDescriptor {
            mnemonic: self.input.to_string(),
            base,
            manipulation,
            window,
        })
    }
}

/// Parse a single feature mnemonic.
pub fn parse_mnemonic(input: &str) -> Result<FeatureDescriptor, FeatureParseError> {
    MnemonicParser::new(input.trim()).parse()
}

/// Parse a feature list, failing on the first bad mnemonic. Repeated
/// mnemonics are kept once, in first-seen order.
pub fn parse_feature_list<S: AsRef<str>>(
    mnemonics: &[S],
) -> Result<Vec<FeatureDescriptor>, FeatureParseError> {
    let mut out: Vec<FeatureDescriptor> = Vec::with_capacity(mnemonics.len());
    for m in mnemonics {
        let descriptor = parse_mnemonic(m.as_ref())?;
        if !out.iter().any(|d| d.mnemonic == descriptor.mnemonic) {
            out.push(descriptor);
        }
    }
    Ok(out)
}
