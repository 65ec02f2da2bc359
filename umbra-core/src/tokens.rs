//! Shared movable markers.
//!
//! Tokens never go through the merge/regeneration pipeline: each command
//! mutates the board directly and the whole collection is re-broadcast.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_LABEL_CHARS: usize = 2;
pub const DEFAULT_LABEL: &str = "A";
pub const DEFAULT_COLOR: &str = "#ff0000";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("Invalid token color '{0}' (expected #rrggbb)")]
    InvalidColor(String),
    #[error("Token coordinate is not a finite number")]
    InvalidCoordinate,
    #[error("Token not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub label: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
}

/// A GM token command as it arrives on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TokenCommand {
    Place {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
    Move {
        token_id: String,
        x: f64,
        y: f64,
    },
    Remove {
        token_id: String,
    },
    Recolor {
        token_id: String,
        color: String,
    },
}

impl TokenCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TokenCommand::Place { .. } => "place",
            TokenCommand::Move { .. } => "move",
            TokenCommand::Remove { .. } => "remove",
            TokenCommand::Recolor { .. } => "recolor",
        }
    }
}

/// `#rrggbb`, exactly six hex digits.
pub fn is_token_color(color: &str) -> bool {
    let bytes = color.as_bytes();
    bytes.len() == 7 && bytes[0] == b'#' && bytes[1..].iter().all(u8::is_ascii_hexdigit)
}

fn clamp_unit(v: f64) -> Result<f64, TokenError> {
    if !v.is_finite() {
        return Err(TokenError::InvalidCoordinate);
    }
    Ok(v.clamp(0.0, 1.0))
}

fn generate_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("tok_{millis}_{}", &suffix[..5])
}

/// Token collection in placement order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TokenBoard {
    tokens: Vec<Token>,
}

impl TokenBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }

    /// Replace the whole board (save restore).
    pub fn replace(&mut self, tokens: Vec<Token>) {
        self.tokens = tokens;
    }

    /// Apply one command. On error the board is unchanged.
    pub fn apply(&mut self, command: TokenCommand) -> Result<(), TokenError> {
        match command {
            TokenCommand::Place { label, color, x, y } => {
                let color = color.unwrap_or_else(|| DEFAULT_COLOR.to_string());
                if !is_token_color(&color) {
                    return Err(TokenError::InvalidColor(color));
                }
                let x = clamp_unit(x.unwrap_or(0.5))?;
                let y = clamp_unit(y.unwrap_or(0.5))?;
                let label: String = label
                    .unwrap_or_else(|| DEFAULT_LABEL.to_string())
                    .chars()
                    .take(MAX_LABEL_CHARS)
                    .collect();
                let token = Token {
                    id: generate_id(),
                    label,
                    color,
                    x,
                    y,
                };
                log::info!("token placed id={} label={}", token.id, token.label);
                self.tokens.push(token);
            }
            TokenCommand::Move { token_id, x, y } => {
                let x = clamp_unit(x)?;
                let y = clamp_unit(y)?;
                let token = self.find_mut(&token_id)?;
                token.x = x;
                token.y = y;
                log::debug!("token moved id={token_id} x={x:.3} y={y:.3}");
            }
            TokenCommand::Remove { token_id } => {
                let before = self.tokens.len();
                self.tokens.retain(|t| t.id != token_id);
                if self.tokens.len() == before {
                    return Err(TokenError::NotFound(token_id));
                }
                log::info!("token removed id={token_id}");
            }
            TokenCommand::Recolor { token_id, color } => {
                if !is_token_color(&color) {
                    return Err(TokenError::InvalidColor(color));
                }
                let token = self.find_mut(&token_id)?;
                token.color = color;
                log::info!("token recolored id={token_id} color={}", token.color);
            }
        }
        Ok(())
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Token, TokenError> {
        self.tokens
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TokenError::NotFound(id.to_string()))
    }
}
