//! Declarative argument parsing for scripts.
//!
//! Options are described by [`ArgSpec`]s, written either as JSON or as
//! `name|short|type|var|help|choices` records. Scanning stops at `--` or at
//! the first token that is not a known option; everything from there on is
//! positional.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors in an argument spec.
#[derive(Debug, Error)]
pub enum ArgSpecError {
    #[error("failed to parse JSON arg specs: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("invalid arg spec (expected name|short|type|var[|help[|choices]]): {0}")]
    InvalidArity(String),

    #[error("arg spec is missing required field '{field}': {record}")]
    MissingField { field: &'static str, record: String },

    #[error("invalid arg type '{0}': expected flag, value or enum")]
    InvalidType(String),

    #[error("invalid short option '{0}': must be a single ASCII letter or digit")]
    InvalidShortOption(String),

    #[error("invalid variable name '{0}'")]
    InvalidVarName(String),

    #[error("enum option '{0}' has no choices")]
    EmptyChoices(String),

    #[error("'choices' cannot be used with flag type on option '{0}'")]
    ChoicesOnFlag(String),

    #[error("duplicate option name: {0}")]
    DuplicateName(String),

    #[error("duplicate short option: -{0}")]
    DuplicateShort(char),
}

/// Errors that can occur during argument parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing value for option: {0}")]
    MissingValue(String),

    #[error("invalid value '{value}' for option {option} (allowed: {allowed})")]
    InvalidChoice {
        option: String,
        value: String,
        allowed: String,
    },

    #[error("unknown option: {0}")]
    UnknownOption(String),
}

/// The kind of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    /// A boolean switch (e.g., --verbose)
    Flag,
    /// An option taking the next token as its value (e.g., --output file.txt)
    Value,
    /// A value restricted to a list of choices
    Enum,
}

impl FromStr for ArgType {
    type Err = ArgSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "flag" => Ok(ArgType::Flag),
            "value" => Ok(ArgType::Value),
            "enum" => Ok(ArgType::Enum),
            other => Err(ArgSpecError::InvalidType(other.to_string())),
        }
    }
}

/// How unknown options are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Unknown options are an error.
    #[default]
    Strict,
    /// Unknown options end scanning and are handed off as positionals.
    Builtins,
}

/// Declaration of a single option.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArgSpec {
    /// Long option name, matched as `--name`
    pub name: String,
    /// Short option character, matched as `-c`
    #[serde(default)]
    pub short: Option<char>,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    /// Variable the value is bound to
    #[serde(rename = "var")]
    pub var_name: String,
    #[serde(default)]
    pub help: Option<String>,
    /// Allowed values for enum options
    #[serde(default)]
    pub choices: Vec<String>,
}

impl ArgSpec {
    /// Parse a `name|short|type|var|help|choices` record.
    ///
    /// `help` and `choices` may be omitted; choices are comma-separated.
    pub fn parse(record: &str) -> Result<ArgSpec, ArgSpecError> {
        let fields: Vec<&str> = record.split('|').collect();
        if !(4..=6).contains(&fields.len()) {
            return Err(ArgSpecError::InvalidArity(record.to_string()));
        }

        let field = |idx: usize| fields.get(idx).map(|f| f.trim()).unwrap_or("");
        let required = |idx: usize, name: &'static str| {
            let value = field(idx);
            if value.is_empty() {
                Err(ArgSpecError::MissingField {
                    field: name,
                    record: record.to_string(),
                })
            } else {
                Ok(value.to_string())
            }
        };

        let short = match field(1) {
            "" => None,
            s => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => return Err(ArgSpecError::InvalidShortOption(s.to_string())),
                }
            }
        };

        let spec = ArgSpec {
            name: required(0, "name")?,
            short,
            arg_type: required(2, "type")?.parse()?,
            var_name: required(3, "var")?,
            help: Some(field(4)).filter(|h| !h.is_empty()).map(str::to_string),
            choices: field(5)
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a JSON array of specs and validate it.
    pub fn from_json(json: &str) -> Result<Vec<ArgSpec>, ArgSpecError> {
        let specs: Vec<ArgSpec> = serde_json::from_str(json)?;
        validate_specs(&specs)?;
        Ok(specs)
    }

    /// Validate a single spec.
    pub fn validate(&self) -> Result<(), ArgSpecError> {
        if let Some(short) = self.short {
            if !short.is_ascii_alphanumeric() {
                return Err(ArgSpecError::InvalidShortOption(short.to_string()));
            }
        }
        if !is_shell_identifier(&self.var_name) {
            return Err(ArgSpecError::InvalidVarName(self.var_name.clone()));
        }
        match self.arg_type {
            ArgType::Flag if !self.choices.is_empty() => {
                Err(ArgSpecError::ChoicesOnFlag(self.name.clone()))
            }
            ArgType::Enum if self.choices.is_empty() => {
                Err(ArgSpecError::EmptyChoices(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    /// The value a variable holds before any token binds it.
    pub fn default_value(&self) -> ArgValue {
        match self.arg_type {
            ArgType::Flag => ArgValue::Flag(false),
            ArgType::Value | ArgType::Enum => ArgValue::Value(String::new()),
        }
    }

    fn matches(&self, token: &str) -> bool {
        if let Some(long) = token.strip_prefix("--") {
            return !long.is_empty() && long == self.name;
        }
        match (token.strip_prefix('-'), self.short) {
            (Some(rest), Some(short)) => {
                let mut chars = rest.chars();
                chars.next() == Some(short) && chars.next().is_none()
            }
            _ => false,
        }
    }
}

/// Validate every spec and reject duplicate names or short options.
pub fn validate_specs(specs: &[ArgSpec]) -> Result<(), ArgSpecError> {
    let mut names = HashSet::new();
    let mut shorts = HashSet::new();

    for spec in specs {
        spec.validate()?;
        if !names.insert(&spec.name) {
            return Err(ArgSpecError::DuplicateName(spec.name.clone()));
        }
        if let Some(short) = spec.short {
            if !shorts.insert(short) {
                return Err(ArgSpecError::DuplicateShort(short));
            }
        }
    }
    Ok(())
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A bound option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Flag(bool),
    Value(String),
}

impl ArgValue {
    /// Shell representation: `true`/`false` for flags, the raw value otherwise.
    pub fn as_shell_str(&self) -> &str {
        match self {
            ArgValue::Flag(true) => "true",
            ArgValue::Flag(false) => "false",
            ArgValue::Value(v) => v,
        }
    }
}

/// Bound variables plus the positional residue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    values: BTreeMap<String, ArgValue>,
    positional: Vec<String>,
    terminated: bool,
}

impl ParseResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every variable in `specs` to its type default and clear the
    /// positionals.
    pub fn reset(&mut self, specs: &[ArgSpec]) {
        self.values.clear();
        self.positional.clear();
        self.terminated = false;
        for spec in specs {
            self.values.insert(spec.var_name.clone(), spec.default_value());
        }
    }

    pub fn get(&self, var: &str) -> Option<&ArgValue> {
        self.values.get(var)
    }

    /// Whether flag `var` is set.
    pub fn flag(&self, var: &str) -> bool {
        matches!(self.values.get(var), Some(ArgValue::Flag(true)))
    }

    /// Value bound to `var`, if it is a value variable.
    pub fn value(&self, var: &str) -> Option<&str> {
        match self.values.get(var) {
            Some(ArgValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Bound variables in name order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Whether scanning stopped at a `--` terminator.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Take the bindings of `other` on top of these ones.
    pub fn merge(&mut self, other: ParseResult) {
        self.values.extend(other.values);
        self.positional = other.positional;
        self.terminated = other.terminated;
    }
}

/// A set of option specs applied in one [`Mode`].
#[derive(Debug, Clone, Copy)]
pub struct ArgParser<'a> {
    specs: &'a [ArgSpec],
    mode: Mode,
}

impl<'a> ArgParser<'a> {
    pub fn new(specs: &'a [ArgSpec], mode: Mode) -> Self {
        Self { specs, mode }
    }

    pub fn parse<S: AsRef<str>>(&self, argv: &[S]) -> Result<ParseResult, ParseError> {
        let mut result = ParseResult::new();
        self.parse_into(argv, &mut result)?;
        Ok(result)
    }

    /// Parse into `result`, resetting it first.
    ///
    /// On error `result` may hold a partial binding.
    pub fn parse_into<S: AsRef<str>>(
        &self,
        argv: &[S],
        result: &mut ParseResult,
    ) -> Result<(), ParseError> {
        result.reset(self.specs);

        let mut tokens = argv.iter().map(AsRef::as_ref);
        while let Some(token) = tokens.next() {
            if token == "--" {
                result.terminated = true;
                result.positional.extend(tokens.map(str::to_string));
                break;
            }

            if let Some(spec) = self.specs.iter().find(|s| s.matches(token)) {
                let value = match spec.arg_type {
                    ArgType::Flag => ArgValue::Flag(true),
                    ArgType::Value | ArgType::Enum => {
                        let value = tokens
                            .next()
                            .ok_or_else(|| ParseError::MissingValue(token.to_string()))?;
                        if spec.arg_type == ArgType::Enum && !spec.choices.iter().any(|c| c == value)
                        {
                            return Err(ParseError::InvalidChoice {
                                option: token.to_string(),
                                value: value.to_string(),
                                allowed: spec.choices.join(","),
                            });
                        }
                        ArgValue::Value(value.to_string())
                    }
                };
                result.values.insert(spec.var_name.clone(), value);
                continue;
            }

            if is_option_like(token) {
                if self.mode == Mode::Strict {
                    return Err(ParseError::UnknownOption(token.to_string()));
                }
                debug!("handing off unknown option {}", token);
            }

            result.positional.push(token.to_string());
            result.positional.extend(tokens.map(str::to_string));
            break;
        }

        Ok(())
    }
}

fn is_option_like(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

/// Parse `argv` against `specs` in `mode`.
pub fn parse_args<S: AsRef<str>>(
    specs: &[ArgSpec],
    argv: &[S],
    mode: Mode,
) -> Result<ParseResult, ParseError> {
    ArgParser::new(specs, mode).parse(argv)
}

/// Variable bound by the reserved `--dryrun` flag.
pub const DRYRUN_VAR: &str = "DRYRUN";
/// Variable bound by the reserved `--verbose` flag.
pub const VERBOSE_VAR: &str = "VERBOSE";
/// Variable bound by the reserved `--help` flag.
pub const HELP_VAR: &str = "HELP";

/// Flags every script accepts ahead of its own options.
pub fn framework_arg_specs() -> Vec<ArgSpec> {
    let flag = |name: &str, short: char, var: &str, help: &str| ArgSpec {
        name: name.to_string(),
        short: Some(short),
        arg_type: ArgType::Flag,
        var_name: var.to_string(),
        help: Some(help.to_string()),
        choices: Vec::new(),
    };
    vec![
        flag("dryrun", 'n', DRYRUN_VAR, "Report actions instead of performing them"),
        flag("verbose", 'v', VERBOSE_VAR, "Enable verbose output"),
        flag("help", 'h', HELP_VAR, "Print help"),
    ]
}

/// Outcome of a two-pass parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreludeResult {
    /// Bindings of the framework flags
    pub framework: ParseResult,
    /// Bindings of the script's own options and the final positionals
    pub script: ParseResult,
}

/// Parse the framework flags leniently, then the residue strictly.
///
/// A `--` that ended the first pass is put back in front of the residue so
/// the script's options stop at the same point.
pub fn parse_with_prelude<S: AsRef<str>>(
    framework: &[ArgSpec],
    script: &[ArgSpec],
    argv: &[S],
) -> Result<PreludeResult, ParseError> {
    let framework_result = ArgParser::new(framework, Mode::Builtins).parse(argv)?;

    let mut residue: Vec<&str> = Vec::with_capacity(framework_result.positional().len() + 1);
    if framework_result.terminated() {
        residue.push("--");
    }
    residue.extend(framework_result.positional().iter().map(String::as_str));

    let script_result = ArgParser::new(script, Mode::Strict).parse(&residue)?;
    Ok(PreludeResult {
        framework: framework_result,
        script: script_result,
    })
}
