//! Configuration variables.
//!
//! A small console-variable registry: every tunable of the pipeline is a named
//! string/float pair with flags. Hosts can feed it `set <name> "<value>"` lines
//! and write archived variables back out in the same form.

use std::collections::HashMap;

use tracing::{debug, warn};

bitflags::bitflags! {
    /// Behaviour flags of a config variable.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CvarFlags: u32 {
        /// Written out by `write_archived`.
        const ARCHIVE = 1 << 0;
        /// Cannot be changed with `set`; only `force_set`.
        const NOSET   = 1 << 1;
        /// Changes are held until `apply_latched`.
        const LATCH   = 1 << 2;
    }
}

/// A config variable.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub latched_string: Option<String>,
    pub flags: CvarFlags,
    pub modified: bool,
    pub value: f32,
}

/// The config variable registry.
#[derive(Debug, Default)]
pub struct CvarRegistry {
    vars: Vec<Cvar>,
    /// O(1) lookup by name -> index in `vars`
    index: HashMap<String, usize>,
}

impl CvarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a variable by name.
    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.index.get(name).map(|&idx| &self.vars[idx])
    }

    /// Float value of a variable, or `default` when it does not exist.
    pub fn value_or(&self, name: &str, default: f32) -> f32 {
        self.find_var(name).map_or(default, |v| v.value)
    }

    /// Float value of a variable. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.value_or(name, 0.0)
    }

    /// String value of a variable. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |v| v.string.as_str())
    }

    /// Get or create a variable. An existing value is kept; flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: CvarFlags) -> usize {
        if let Some(&idx) = self.index.get(name) {
            self.vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.vars.len();
        self.vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            latched_string: None,
            flags,
            modified: true,
            value: parse_value(value),
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) -> usize {
        let idx = match self.index.get(name).copied() {
            Some(idx) => idx,
            None => return self.get(name, value, CvarFlags::empty()),
        };
        let var = &mut self.vars[idx];

        if !force {
            if var.flags.contains(CvarFlags::NOSET) {
                warn!(name, "config variable is write protected");
                return idx;
            }
            if var.flags.contains(CvarFlags::LATCH) {
                let pending = var.latched_string.as_deref().unwrap_or(&var.string);
                if pending != value {
                    debug!(name, value, "config variable latched");
                    var.latched_string = Some(value.to_string());
                }
                return idx;
            }
        } else {
            var.latched_string = None;
        }

        if var.string == value {
            return idx;
        }

        var.modified = true;
        var.string = value.to_string();
        var.value = parse_value(value);
        idx
    }

    /// Set a variable (respects NOSET and LATCH).
    pub fn set(&mut self, name: &str, value: &str) -> usize {
        self.set2(name, value, false)
    }

    /// Set a variable, ignoring NOSET and LATCH.
    pub fn force_set(&mut self, name: &str, value: &str) -> usize {
        self.set2(name, value, true)
    }

    /// Set a variable from a float value.
    pub fn set_value(&mut self, name: &str, value: f32) -> usize {
        let text = if value == (value as i32) as f32 {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &text)
    }

    /// Apply every latched change.
    pub fn apply_latched(&mut self) {
        for var in &mut self.vars {
            if let Some(latched) = var.latched_string.take() {
                var.value = parse_value(&latched);
                var.string = latched;
                var.modified = true;
            }
        }
    }

    /// Names of variables modified since the last call; clears the flags.
    pub fn take_modified(&mut self) -> Vec<String> {
        self.vars
            .iter_mut()
            .filter(|v| v.modified)
            .map(|v| {
                v.modified = false;
                v.name.clone()
            })
            .collect()
    }

    /// Execute config text: one `set <name> <value>` per line, `//` comments allowed.
    ///
    /// Returns the number of variables set.
    pub fn exec(&mut self, text: &str) -> usize {
        let mut count = 0;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split("//").next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, char::is_whitespace);
            let (cmd, name, value) = (parts.next(), parts.next(), parts.next());
            match (cmd, name, value) {
                (Some("set"), Some(name), Some(value)) => {
                    self.set(name, value.trim().trim_matches('"'));
                    count += 1;
                }
                _ => warn!(line = lineno + 1, text = raw, "ignoring malformed config line"),
            }
        }
        count
    }

    /// Write all archived variables.
    pub fn write_archived(&self, writer: &mut dyn std::io::Write) -> std::io::Result<()> {
        for var in &self.vars {
            if var.flags.contains(CvarFlags::ARCHIVE) {
                writeln!(writer, "set {} \"{}\"", var.name, var.string)?;
            }
        }
        Ok(())
    }

    /// Iterate over all variables in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Cvar> {
        self.vars.iter()
    }
}

fn parse_value(text: &str) -> f32 {
    text.trim().parse::<f32>().unwrap_or(0.0)
}

// ============================================================
// Tests
// ============================================================
