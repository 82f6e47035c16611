//! Decompiler options.
//!
//! Options can be built in code or parsed from TOML:
//!
//! ```toml
//! indent_width = 2
//! max_nesting_depth = 64
//! max_statements = 10000
//! ```

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecompileOptions {
    /// Spaces per indentation level. Default: 4.
    pub indent_width: usize,
    /// Deepest indentation level nested control flow may reach. Default: 256.
    pub max_nesting_depth: usize,
    /// Most statements a single decompilation may emit. Default: 100000.
    pub max_statements: usize,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            indent_width: 4,
            max_nesting_depth: 256,
            max_statements: 100_000,
        }
    }
}

impl DecompileOptions {
    /// Parse options from a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
