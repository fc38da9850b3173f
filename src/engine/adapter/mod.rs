mod flat;
mod language;
mod structured;

use std::str::FromStr;

use serde::Serialize;

use crate::engine::models::{ExecutionOutcome, ExecutionRequest};

pub use flat::{FlatAdapter, FlatRequest};
pub use language::LanguageSpec;
pub use structured::{SourceFile, StructuredAdapter, StructuredLimits, StructuredRequest};

/// Body of one outbound provider request, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireRequest {
    Structured(StructuredRequest),
    Flat(FlatRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Structured,
    Flat,
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "piston" => Ok(Self::Structured),
            "flat" | "codex" => Ok(Self::Flat),
            _ => Err(format!("unsupported wire format: {s}")),
        }
    }
}

/// Closed set of provider schemas. Adding a provider format means adding a
/// variant here.
#[derive(Debug, Clone)]
pub enum SchemaAdapter {
    Structured(StructuredAdapter),
    Flat(FlatAdapter),
}

impl SchemaAdapter {
    pub fn for_format(format: WireFormat, limits: &StructuredLimits) -> Self {
        match format {
            WireFormat::Structured => Self::Structured(StructuredAdapter::new(limits.clone())),
            WireFormat::Flat => Self::Flat(FlatAdapter),
        }
    }

    pub fn format(&self) -> WireFormat {
        match self {
            Self::Structured(_) => WireFormat::Structured,
            Self::Flat(_) => WireFormat::Flat,
        }
    }

    pub fn build_request(&self, request: &ExecutionRequest) -> WireRequest {
        match self {
            Self::Structured(adapter) => adapter.build_request(request),
            Self::Flat(adapter) => adapter.build_request(request),
        }
    }

    /// Never returns `TransportFailure`; that variant is produced by the
    /// invoker side of an attempt.
    pub fn parse_response(&self, request: &ExecutionRequest, raw: &str) -> ExecutionOutcome {
        match self {
            Self::Structured(adapter) => adapter.parse_response(request, raw),
            Self::Flat(adapter) => adapter.parse_response(request, raw),
        }
    }
}
