//! Trigger descriptions, from command line flags or a JSON file.
//!
//! A trigger file is an array of objects:
//!
//! ```json
//! [
//!   { "routine": "f", "at": ["return"], "condition": "x > 1", "inject": "x = 0" },
//!   { "routine": "f", "at": [["y =", 3]], "jump": "return" },
//!   { "routine": "*", "at": ["<start>"], "break": true },
//!   { "routine": "f", "at": [{ "pattern": "y\\s*=" }], "inject": "y = 1" }
//! ]
//! ```
//!
//! `routine` is a routine of the loaded module, the module name for every routine
//! in it, or `*` for all routines. Entries of `at` are OR'd; a nested array is a
//! tuple whose members must all match. On the command line a regular expression is
//! written between slashes: `f:/y\s*=/`.

use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc};
use waypoint_engine::{Anchor, Callback, Identifier, Instrumenter, Namespace, source_hash};
use waypoint_script::Module;

/// Anchor name selecting every routine.
pub(crate) const GLOBAL: &str = "*";

/// One location in a trigger file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Location {
    Line(u32),
    Text(String),
    Pattern { pattern: String },
    All(Vec<Location>),
}

impl Location {
    /// A command line location: a bare number is a line number and `/re/` is a
    /// regular expression.
    pub(crate) fn parse(text: &str) -> Self {
        let text = text.trim();
        if !text.is_empty()
            && text.bytes().all(|b| b.is_ascii_digit())
            && let Ok(line) = text.parse()
        {
            return Self::Line(line);
        }
        if let Some(pattern) = text
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            return Self::Pattern {
                pattern: pattern.to_owned(),
            };
        }
        Self::Text(text.to_owned())
    }

    fn identifier(&self) -> Result<Identifier> {
        Ok(match self {
            Self::Line(n) => Identifier::Line(*n),
            Self::Text(text) => Identifier::parse(text),
            Self::Pattern { pattern } => Identifier::pattern(pattern)?,
            Self::All(members) => Identifier::all(
                members
                    .iter()
                    .map(Self::identifier)
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

/// One trigger and what it does when it fires.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TriggerSpec {
    pub(crate) routine: String,
    #[serde(default)]
    pub(crate) at: Vec<Location>,
    #[serde(default)]
    pub(crate) condition: Option<String>,
    #[serde(default)]
    pub(crate) inject: Option<String>,
    #[serde(default)]
    pub(crate) jump: Option<Location>,
    #[serde(default, rename = "break")]
    pub(crate) breakpoint: bool,
    #[serde(default)]
    pub(crate) source_hash: Option<String>,
}

impl TriggerSpec {
    /// Parses a `routine:identifier` command line location.
    pub(crate) fn from_flag(flag: &str) -> Result<Self> {
        let (routine, at) = flag
            .split_once(':')
            .ok_or_else(|| eyre!("expected ROUTINE:IDENTIFIER, got `{flag}`"))?;
        Ok(Self {
            routine: routine.trim().to_owned(),
            at: vec![Location::parse(at)],
            ..Self::default()
        })
    }

    fn callback(&self) -> Result<Callback> {
        match (&self.inject, &self.jump, self.breakpoint) {
            (Some(source), None, false) => Ok(Callback::inject(source)),
            (None, Some(target), false) => Ok(Callback::jump(target.identifier()?)),
            (None, None, true) => Ok(Callback::breakpoint()),
            (None, None, false) => bail!("trigger on `{}` has no action", self.routine),
            _ => bail!(
                "trigger on `{}` has more than one action; pick one of inject, jump and break",
                self.routine
            ),
        }
    }

    fn anchor(&self, module: &Arc<Module>) -> Result<Anchor> {
        if self.routine == GLOBAL {
            return Ok(Anchor::Global);
        }
        if let Some(routine) = module.routine(&self.routine) {
            return Ok(Anchor::from(routine));
        }
        if self.routine == module.name() {
            let namespace: Arc<dyn Namespace> = module.clone();
            return Ok(Anchor::from(namespace));
        }
        bail!("no routine `{}` in module `{}`", self.routine, module.name())
    }

    /// Builds the trigger and submits its handler.
    pub(crate) fn attach(&self, instrumenter: &Arc<Instrumenter>, module: &Arc<Module>) -> Result<()> {
        let callback = self.callback()?;
        let mut builder = instrumenter.when(self.anchor(module)?);
        for location in &self.at {
            builder = builder.at(location.identifier()?);
        }
        if let Some(condition) = &self.condition {
            builder = builder.condition(condition.as_str());
        }
        if let Some(hash) = &self.source_hash {
            builder = builder.source_hash(hash.as_str());
        }

        let trigger = builder
            .build()
            .wrap_err_with(|| format!("cannot attach to `{}`", self.routine))?;
        let handler = instrumenter.attach(trigger, callback)?;
        log::info!("attached {} to `{}`", handler.id(), self.routine);
        Ok(())
    }
}

/// Reads a JSON trigger file.
pub(crate) fn load(path: &Path) -> Result<Vec<TriggerSpec>> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read trigger file {}", path.display()))?;
    serde_json::from_str(&text)
        .wrap_err_with(|| format!("invalid trigger file {}", path.display()))
}

/// Drift-guard digest of `routine`, or of the whole module when named after it.
pub(crate) fn digest(module: &Arc<Module>, routine: &str) -> Result<String> {
    let spec = TriggerSpec {
        routine: routine.to_owned(),
        ..TriggerSpec::default()
    };
    Ok(source_hash(&spec.anchor(module)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_trigger_file() {
        let specs: Vec<TriggerSpec> = serde_json::from_str(
            r#"[
                { "routine": "f", "at": ["return", 4], "inject": "x = 0" },
                { "routine": "f", "at": [["y =", "+2"]], "jump": "return" },
                { "routine": "*", "at": ["<start>"], "break": true }
            ]"#,
        )
        .unwrap();

        assert_eq!(specs.len(), 3);
        assert!(matches!(specs[0].at[1], Location::Line(4)));
        assert!(matches!(
            specs[1].at[0].identifier().unwrap(),
            Identifier::All(ref members) if matches!(members[1], Identifier::Offset(2))
        ));
        assert!(matches!(specs[2].at[0].identifier().unwrap(), Identifier::Start));
        assert!(specs[2].breakpoint);
    }

    #[test]
    fn regular_expressions() {
        let specs: Vec<TriggerSpec> = serde_json::from_str(
            r#"[{ "routine": "f", "at": [{ "pattern": "y\\s*=" }, ["return", { "pattern": "y$" }]], "inject": "y = 1" }]"#,
        )
        .unwrap();
        assert!(matches!(specs[0].at[0].identifier().unwrap(), Identifier::Pattern(_)));
        assert!(matches!(
            specs[0].at[1].identifier().unwrap(),
            Identifier::All(ref members) if matches!(members[1], Identifier::Pattern(_))
        ));

        let spec = TriggerSpec::from_flag("f:/y\\s*=/").unwrap();
        assert!(matches!(&spec.at[0], Location::Pattern { pattern } if pattern == "y\\s*="));
        assert!(matches!(Location::parse("/").identifier().unwrap(), Identifier::Prefix(_)));

        let spec = TriggerSpec::from_flag("f:/(/").unwrap();
        assert!(spec.at[0].identifier().is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<Vec<TriggerSpec>, _> =
            serde_json::from_str(r#"[{ "routine": "f", "at": [], "injct": "x" }]"#);
        assert!(result.is_err());
    }

    #[test]
    fn flags() {
        let spec = TriggerSpec::from_flag("f:3").unwrap();
        assert_eq!(spec.routine, "f");
        assert!(matches!(spec.at[0], Location::Line(3)));

        let spec = TriggerSpec::from_flag("f:+3").unwrap();
        assert!(matches!(spec.at[0].identifier().unwrap(), Identifier::Offset(3)));

        let spec = TriggerSpec::from_flag("f: return y").unwrap();
        assert!(matches!(&spec.at[0], Location::Text(text) if text == "return y"));

        assert!(TriggerSpec::from_flag("f").is_err());
    }

    #[test]
    fn exactly_one_action() {
        let mut spec = TriggerSpec::from_flag("f:1").unwrap();
        assert!(spec.callback().is_err());
        spec.inject = Some("x = 1".into());
        assert!(spec.callback().is_ok());
        spec.breakpoint = true;
        assert!(spec.callback().is_err());
    }
}
