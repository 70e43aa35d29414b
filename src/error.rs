// SPDX-License-Identifier: GPL-3.0-only
use std::fmt;

use crate::catalog::models::Category;

/// Malformed catalog document
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,

    /// Up to three lines around the failure, for diagnostics
    pub context: Vec<String>,
}

impl ParseError {
    /// Build an error positioned at a byte offset of `source`
    pub fn at_offset(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let mut offset = offset.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &source.as_bytes()[..offset];
        let line = before.iter().filter(|b| **b == b'\n').count() + 1;
        let line_start = before
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        let column = source[line_start..offset].chars().count() + 1;

        let lines: Vec<&str> = source.lines().collect();
        let first = line.saturating_sub(2);
        let last = (line + 1).min(lines.len());
        let context = lines
            .get(first..last)
            .unwrap_or_default()
            .iter()
            .map(|l| l.to_string())
            .collect();

        Self {
            message: message.into(),
            line,
            column,
            context,
        }
    }
}

/// Failure of one remote operation
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct TransportError {
    /// Human-readable description of the operation
    pub operation: String,
    pub message: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required build file missing: {0}")]
    MissingBuildFile(String),

    #[error("BUILD_INFO is missing or unreadable: {0}")]
    MissingBuildInfo(String),

    #[error("UAVO hash mismatch: {name} has '{found}', expected '{expected}'")]
    UavoHashMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Catalog has pending changes; push or discard them first")]
    PendingChanges,

    #[error("No catalog loaded; fetch one or start a new one")]
    NoCatalog,

    #[error("No item in slot {slot} of the {category} table")]
    SlotNotFound { category: Category, slot: u32 },

    #[error("{software} artifacts cannot target {os}")]
    IllFormedArtifact { software: String, os: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// External tool exited unsuccessfully
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub struct ExternalProcessError {
    pub program: String,

    /// None when the process was killed by a signal
    pub code: Option<i32>,

    /// Last lines of merged stdout/stderr
    pub output: Vec<String>,
}

impl fmt::Display for ExternalProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with code {}", self.program, code),
            None => write!(f, "{} terminated abnormally", self.program),
        }
    }
}

/// Errors surfaced by the release workflows
#[derive(thiserror::Error, Debug)]
pub enum ReleaseError {
    #[error("Catalog parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("External process error: {0}")]
    ExternalProcess(#[from] ExternalProcessError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
