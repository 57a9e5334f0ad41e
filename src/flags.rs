//! Command-line flag rendering for supervised programs.
//!
//! A `Flag` is a name with an optional value. A `FlagList` renders flags into an
//! argument vector in list order; lists built from maps are sorted by name first
//! so the same settings always produce the same invocation.

use std::fmt;

use serde::Deserialize;

/// Dash prefix used when a flag name does not already carry one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashStyle {
    /// `-name`
    Single,
    /// `--name`
    #[default]
    Double,
}

impl DashStyle {
    pub fn prefix(self) -> &'static str {
        match self {
            DashStyle::Single => "-",
            DashStyle::Double => "--",
        }
    }
}

/// A single command-line flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub name: String,
    pub value: String,
}

impl Flag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Renders the flag as `<dash><name>` or `<dash><name>=<value>`.
    ///
    /// Names that already start with `-` are used as-is.
    pub fn render(&self, dash: DashStyle) -> String {
        let mut out = String::with_capacity(self.name.len() + self.value.len() + 3);
        if !self.name.starts_with('-') {
            out.push_str(dash.prefix());
        }
        out.push_str(&self.name);
        if !self.value.is_empty() {
            out.push('=');
            out.push_str(&self.value);
        }
        out
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DashStyle::default()))
    }
}

/// An ordered list of flags sharing one dash style.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagList {
    dash: DashStyle,
    flags: Vec<Flag>,
}

impl FlagList {
    /// Builds a list from an unordered source, sorted by flag name.
    pub fn from_map<I, K, V>(dash: DashStyle, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut flags: Vec<Flag> = entries
            .into_iter()
            .map(|(name, value)| Flag::new(name, value))
            .collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        Self { dash, flags }
    }

    /// Appends a flag after the existing ones.
    pub fn push(&mut self, flag: Flag) {
        self.flags.push(flag);
    }

    /// Renders every flag in list order.
    pub fn to_args(&self) -> Vec<String> {
        self.flags.iter().map(|flag| flag.render(self.dash)).collect()
    }
}

impl fmt::Display for FlagList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn renders_name_value_pairs() {
        let flag = Flag::new("--datadir", "/x");
        assert_eq!(flag.render(DashStyle::Double), "--datadir=/x");
        assert_eq!(flag.render(DashStyle::Single), "--datadir=/x");
        assert_eq!(flag.to_string(), "--datadir=/x");
    }

    #[test]
    fn empty_value_renders_bare() {
        let flag = Flag::new("daemon-flag", "");
        assert_eq!(flag.render(DashStyle::Double), "--daemon-flag");
        assert_eq!(flag.render(DashStyle::Single), "-daemon-flag");
    }

    #[test]
    fn existing_dash_is_not_doubled() {
        assert_eq!(Flag::new("-conf", "a.conf").render(DashStyle::Double), "-conf=a.conf");
        assert_eq!(Flag::new("conf", "a.conf").render(DashStyle::Single), "-conf=a.conf");
    }

    #[test]
    fn map_order_is_sorted_and_stable() {
        let mut forward = HashMap::new();
        forward.insert("satoshi-datadir", "/btc");
        forward.insert("datadir", "/tmp/w");
        forward.insert("offline", "");
        let mut backward = HashMap::new();
        backward.insert("offline", "");
        backward.insert("datadir", "/tmp/w");
        backward.insert("satoshi-datadir", "/btc");

        let expected = vec!["--datadir=/tmp/w", "--offline", "--satoshi-datadir=/btc"];
        for _ in 0..5 {
            assert_eq!(FlagList::from_map(DashStyle::Double, forward.clone()).to_args(), expected);
            assert_eq!(FlagList::from_map(DashStyle::Double, backward.clone()).to_args(), expected);
        }
    }

    #[test]
    fn pushed_flags_follow_sorted_ones() {
        let mut list = FlagList::from_map(DashStyle::Single, [("conf", "a.conf"), ("b", "2")]);
        list.push(Flag::new("-txindex", ""));
        list.push(Flag::new("a", "1"));
        assert_eq!(list.to_string(), "-b=2 -conf=a.conf -txindex -a=1");
    }
}
