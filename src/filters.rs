//! Filter factory: build and edit named SIEVE filters without writing
//! SIEVE syntax.
//!
//! A [`FilterSet`] owns an ordered list of named filters, each one an
//! `if <anyof|allof> (...) { ... }` command tree, plus the `require` list
//! shared by all of them. Conditions and actions are supplied as flat
//! value lists ([`FilterArg`]) and translated to command trees; the same
//! flat form is reconstructed by the introspection methods, whether the
//! tree came from this factory or from a parsed script.

use std::fmt;

use thiserror::Error;

use crate::command::{ArgValue, Command, CommandError, Registry, unquote};
use crate::parser::Parser;

const MATCH_TYPES: [&str; 6] = [":is", ":contains", ":matches", ":value", ":count", ":regex"];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FactoryError {
    #[error("filter {0} already exists")]
    FilterAlreadyExists(String),
    #[error("invalid filter definition: {0}")]
    InvalidDefinition(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// One member of a condition or action definition.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    Str(String),
    List(Vec<String>),
    Num(u64),
}

impl From<&str> for FilterArg {
    fn from(value: &str) -> Self {
        FilterArg::Str(value.to_string())
    }
}

impl From<String> for FilterArg {
    fn from(value: String) -> Self {
        FilterArg::Str(value)
    }
}

impl From<u64> for FilterArg {
    fn from(value: u64) -> Self {
        FilterArg::Num(value)
    }
}

impl From<&[&str]> for FilterArg {
    fn from(value: &[&str]) -> Self {
        FilterArg::List(value.iter().map(|s| s.to_string()).collect())
    }
}

pub type Condition = Vec<FilterArg>;
pub type Action = Vec<FilterArg>;

/// How a filter's conditions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchKind {
    #[default]
    AnyOf,
    AllOf,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::AnyOf => "anyof",
            MatchKind::AllOf => "allof",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// A named filter: its command tree and whether it is active. Disabling
/// wraps the tree in `if false { ... }`; enabling unwraps one level.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub description: Option<String>,
    pub content: Command,
    pub enabled: bool,
}

/// An ordered, named collection of filters sharing one `require` list.
#[derive(Debug, Clone)]
pub struct FilterSet {
    pub name: String,
    registry: Registry,
    requires: Vec<String>,
    filters: Vec<Filter>,
    filter_name_pretext: String,
    filter_desc_pretext: String,
}

impl FilterSet {
    pub fn new(name: &str) -> Self {
        Self::with_pretexts(name, "# Filter: ", "# Description: ")
    }

    /// A filter set using custom comment pretexts for filter names and
    /// descriptions (e.g. `"# rule:"` for webmail-generated scripts).
    pub fn with_pretexts(name: &str, name_pretext: &str, desc_pretext: &str) -> Self {
        Self {
            name: name.to_string(),
            registry: Registry::default(),
            requires: Vec::new(),
            filters: Vec::new(),
            filter_name_pretext: name_pretext.to_string(),
            filter_desc_pretext: desc_pretext.to_string(),
        }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// The extension requirement list, in first-insertion order.
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// Add an extension to the requirement list (set semantics).
    pub fn require(&mut self, name: &str) {
        let name = unquote(name).to_string();
        if !self.requires.contains(&name) {
            self.requires.push(name);
        }
    }

    fn instantiate(&self, name: &str) -> Result<Command, FactoryError> {
        Ok(self.registry.instantiate(name, false, &[])?)
    }

    fn bind(cmd: &mut Command, value: ArgValue) -> Result<(), FactoryError> {
        let display = match &value {
            ArgValue::Str(s) | ArgValue::Number(s) | ArgValue::Tag(s) => s.clone(),
            _ => String::new(),
        };
        let accepted = cmd.check_next_arg(value, true, false, &[])?;
        if !accepted {
            return Err(FactoryError::InvalidDefinition(format!(
                "command {} does not accept argument {display}",
                cmd.name()
            )));
        }
        Ok(())
    }

    fn scalar(arg: &FilterArg) -> Result<String, FactoryError> {
        match arg {
            FilterArg::Str(s) => Ok(s.clone()),
            FilterArg::Num(n) => Ok(n.to_string()),
            FilterArg::List(_) => Err(FactoryError::InvalidDefinition(
                "expected a scalar, found a list".to_string(),
            )),
        }
    }

    fn string_value(arg: &FilterArg) -> ArgValue {
        match arg {
            FilterArg::Str(s) => ArgValue::Str(s.clone()),
            FilterArg::List(items) => ArgValue::StrList(items.clone()),
            FilterArg::Num(n) => ArgValue::Number(n.to_string()),
        }
    }

    /// Classify a positional action argument: numbers, string lists, tags
    /// and plain strings.
    fn classify(arg: &FilterArg) -> ArgValue {
        match arg {
            FilterArg::Num(n) => ArgValue::Number(n.to_string()),
            FilterArg::List(items) => ArgValue::StrList(items.clone()),
            FilterArg::Str(s) if s.starts_with(':') => ArgValue::Tag(s.clone()),
            FilterArg::Str(s) => ArgValue::Str(s.clone()),
        }
    }

    fn strip_not(op: &str) -> (bool, String) {
        match op.strip_prefix(":not") {
            Some(rest) => (true, format!(":{rest}")),
            None => (false, op.to_string()),
        }
    }

    fn negated(&self, inner: Command) -> Result<Command, FactoryError> {
        let mut not = self.instantiate("not")?;
        Self::bind(&mut not, ArgValue::Test(Box::new(inner)))?;
        Ok(not)
    }

    fn item(cond: &[FilterArg], idx: usize) -> Result<&FilterArg, FactoryError> {
        cond.get(idx).ok_or_else(|| {
            FactoryError::InvalidDefinition(format!("missing member {idx} in definition"))
        })
    }

    fn build_condition(&self, cond: &[FilterArg]) -> Result<Command, FactoryError> {
        let first = Self::scalar(Self::item(cond, 0)?)?;
        match first.as_str() {
            "true" | "false" => self.instantiate(&first),
            "size" => {
                let mut cmd = self.instantiate("size")?;
                Self::bind(&mut cmd, ArgValue::Tag(Self::scalar(Self::item(cond, 1)?)?))?;
                Self::bind(&mut cmd, ArgValue::Number(Self::scalar(Self::item(cond, 2)?)?))?;
                Ok(cmd)
            }
            "exists" | "notexists" => {
                let mut headers = Vec::new();
                for arg in &cond[1..] {
                    match arg {
                        FilterArg::List(items) => headers.extend(items.iter().cloned()),
                        other => headers.push(Self::scalar(other)?),
                    }
                }
                let mut cmd = self.instantiate("exists")?;
                Self::bind(&mut cmd, ArgValue::StrList(headers))?;
                if first == "notexists" {
                    return self.negated(cmd);
                }
                Ok(cmd)
            }
            "address" | "envelope" => {
                let (negate, op) = Self::strip_not(&Self::scalar(Self::item(cond, 1)?)?);
                let mut cmd = self.instantiate(&first)?;
                Self::bind(&mut cmd, ArgValue::Tag(op))?;
                Self::bind(&mut cmd, Self::string_value(Self::item(cond, 2)?))?;
                Self::bind(&mut cmd, Self::string_value(Self::item(cond, 3)?))?;
                if negate {
                    return self.negated(cmd);
                }
                Ok(cmd)
            }
            "body" => {
                let transform = Self::scalar(Self::item(cond, 1)?)?;
                let (negate, op) = Self::strip_not(&Self::scalar(Self::item(cond, 2)?)?);
                let mut values = Vec::new();
                for arg in &cond[3..] {
                    match arg {
                        FilterArg::List(items) => values.extend(items.iter().cloned()),
                        other => values.push(Self::scalar(other)?),
                    }
                }
                let mut cmd = self.instantiate("body")?;
                Self::bind(&mut cmd, ArgValue::Tag(op))?;
                Self::bind(&mut cmd, ArgValue::Tag(transform))?;
                Self::bind(&mut cmd, ArgValue::StrList(values))?;
                if negate {
                    return self.negated(cmd);
                }
                Ok(cmd)
            }
            "currentdate" => {
                let mut cmd = self.instantiate("currentdate")?;
                let mut idx = 1;
                let zone = Self::scalar(Self::item(cond, idx)?)?;
                if zone == ":zone" {
                    Self::bind(&mut cmd, ArgValue::Tag(zone))?;
                    Self::bind(&mut cmd, ArgValue::Str(Self::scalar(Self::item(cond, 2)?)?))?;
                    idx = 3;
                } else if zone == ":originalzone" {
                    Self::bind(&mut cmd, ArgValue::Tag(zone))?;
                    idx = 2;
                }
                let (negate, op) = Self::strip_not(&Self::scalar(Self::item(cond, idx)?)?);
                Self::bind(&mut cmd, ArgValue::Tag(op.clone()))?;
                idx += 1;
                if op == ":value" || op == ":count" {
                    Self::bind(&mut cmd, ArgValue::Str(Self::scalar(Self::item(cond, idx)?)?))?;
                    idx += 1;
                }
                Self::bind(&mut cmd, ArgValue::Str(Self::scalar(Self::item(cond, idx)?)?))?;
                let mut values = Vec::new();
                for arg in &cond[idx + 1..] {
                    match arg {
                        FilterArg::List(items) => values.extend(items.iter().cloned()),
                        other => values.push(Self::scalar(other)?),
                    }
                }
                Self::bind(&mut cmd, ArgValue::StrList(values))?;
                if negate {
                    return self.negated(cmd);
                }
                Ok(cmd)
            }
            _ => {
                // Generic header condition: (headers, operator, values).
                let (negate, op) = Self::strip_not(&Self::scalar(Self::item(cond, 1)?)?);
                let mut cmd = self.instantiate("header")?;
                Self::bind(&mut cmd, ArgValue::Tag(op))?;
                Self::bind(&mut cmd, Self::string_value(Self::item(cond, 0)?))?;
                Self::bind(&mut cmd, Self::string_value(Self::item(cond, 2)?))?;
                if negate {
                    return self.negated(cmd);
                }
                Ok(cmd)
            }
        }
    }

    fn build_action(&self, action: &[FilterArg]) -> Result<Command, FactoryError> {
        let name = Self::scalar(Self::item(action, 0)?)?;
        let mut cmd = self.instantiate(&name)?;
        for arg in &action[1..] {
            Self::bind(&mut cmd, Self::classify(arg))?;
        }
        Ok(cmd)
    }

    fn build_filter(
        &self,
        conditions: &[Condition],
        actions: &[Action],
        match_kind: MatchKind,
    ) -> Result<Command, FactoryError> {
        let mut ifcmd = self.instantiate("if")?;
        let mut container = self.instantiate(match_kind.as_str())?;
        for cond in conditions {
            let test = self.build_condition(cond)?;
            Self::bind(&mut container, ArgValue::Test(Box::new(test)))?;
        }
        container.close();
        Self::bind(&mut ifcmd, ArgValue::Test(Box::new(container)))?;
        for action in actions {
            let act = self.build_action(action)?;
            ifcmd.add_child(act);
        }
        Ok(ifcmd)
    }

    /// Walk a filter tree and require every extension it references:
    /// extension-gated commands, extension-gated argument slots, and
    /// values unlocked by an extension.
    fn collect_requires(&mut self, content: &Command) {
        let mut found = Vec::new();
        for cmd in content.walk() {
            if let Some(ext) = &cmd.spec().extension {
                found.push(ext.clone());
            }
            for slot in &cmd.spec().args {
                let Some(value) = cmd.arguments.get(&slot.name) else {
                    continue;
                };
                if let Some(ext) = &slot.extension {
                    found.push(ext.clone());
                }
                if let ArgValue::Tag(tag) = value {
                    let lowered = tag.to_ascii_lowercase();
                    if let Some((_, ext)) =
                        slot.extension_values.iter().find(|(v, _)| *v == lowered)
                    {
                        found.push(ext.clone());
                    }
                }
            }
        }
        for ext in found {
            self.require(&ext);
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.filters.iter().position(|f| f.name == name)
    }

    fn is_disabled_content(content: &Command) -> bool {
        content.name() == "if"
            && matches!(
                content.arguments.get("test"),
                Some(ArgValue::Test(test)) if test.name() == "false"
            )
    }

    /// Add a new filter. Conditions are combined with `match_kind`;
    /// required extensions are collected automatically.
    pub fn add_filter(
        &mut self,
        name: &str,
        conditions: &[Condition],
        actions: &[Action],
        match_kind: MatchKind,
    ) -> Result<(), FactoryError> {
        if self.position(name).is_some() {
            return Err(FactoryError::FilterAlreadyExists(name.to_string()));
        }
        let content = self.build_filter(conditions, actions, match_kind)?;
        self.collect_requires(&content);
        self.filters.push(Filter {
            name: name.to_string(),
            description: None,
            content,
            enabled: true,
        });
        Ok(())
    }

    /// Replace a filter's definition in place, keeping its position.
    /// Returns `Ok(false)` when no filter carries `old_name`.
    pub fn update_filter(
        &mut self,
        old_name: &str,
        new_name: &str,
        conditions: &[Condition],
        actions: &[Action],
        match_kind: MatchKind,
    ) -> Result<bool, FactoryError> {
        if new_name != old_name && self.position(new_name).is_some() {
            return Err(FactoryError::FilterAlreadyExists(new_name.to_string()));
        }
        let Some(idx) = self.position(old_name) else {
            return Ok(false);
        };
        let content = self.build_filter(conditions, actions, match_kind)?;
        self.collect_requires(&content);
        let was_disabled = !self.filters[idx].enabled;
        let filter = &mut self.filters[idx];
        filter.name = new_name.to_string();
        filter.content = content;
        filter.enabled = true;
        if was_disabled {
            self.disable_filter(new_name);
        }
        Ok(true)
    }

    /// Swap the command tree under a name, optionally renaming it.
    pub fn replace_filter(
        &mut self,
        old_name: &str,
        content: Command,
        new_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool, FactoryError> {
        let new_name = new_name.unwrap_or(old_name);
        if new_name != old_name && self.position(new_name).is_some() {
            return Err(FactoryError::FilterAlreadyExists(new_name.to_string()));
        }
        let Some(idx) = self.position(old_name) else {
            return Ok(false);
        };
        self.collect_requires(&content);
        let enabled = !Self::is_disabled_content(&content);
        let filter = &mut self.filters[idx];
        filter.name = new_name.to_string();
        filter.content = content;
        filter.enabled = enabled;
        if let Some(desc) = description {
            filter.description = Some(desc.to_string());
        }
        Ok(true)
    }

    /// The filter's command tree; for a disabled filter, the tree inside
    /// the `if false` wrapper.
    pub fn get_filter(&self, name: &str) -> Option<&Command> {
        let filter = self.filters.iter().find(|f| f.name == name)?;
        if !filter.enabled {
            return filter.content.children.first();
        }
        Some(&filter.content)
    }

    pub fn remove_filter(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.filters.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn move_filter(&mut self, name: &str, direction: MoveDirection) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        match direction {
            MoveDirection::Up => {
                if idx == 0 {
                    return false;
                }
                self.filters.swap(idx, idx - 1);
            }
            MoveDirection::Down => {
                if idx == self.filters.len() - 1 {
                    return false;
                }
                self.filters.swap(idx, idx + 1);
            }
        }
        true
    }

    /// Unwrap the `if false { ... }` guard around a disabled filter.
    pub fn enable_filter(&mut self, name: &str) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        if !Self::is_disabled_content(&self.filters[idx].content) {
            return false;
        }
        if self.filters[idx].content.children.is_empty() {
            return false;
        }
        let inner = self.filters[idx].content.children.remove(0);
        self.filters[idx].content = inner;
        self.filters[idx].enabled = true;
        true
    }

    /// Surround a filter with `if false { ... }` so servers ignore it
    /// while the definition is kept.
    pub fn disable_filter(&mut self, name: &str) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        if Self::is_disabled_content(&self.filters[idx].content) {
            return false;
        }
        let Ok(mut wrapper) = self.instantiate("if") else {
            return false;
        };
        let Ok(falsecmd) = self.instantiate("false") else {
            return false;
        };
        if Self::bind(&mut wrapper, ArgValue::Test(Box::new(falsecmd))).is_err() {
            return false;
        }
        let inner = std::mem::replace(&mut self.filters[idx].content, wrapper);
        self.filters[idx].content.add_child(inner);
        self.filters[idx].enabled = false;
        true
    }

    /// Whether the named filter is wrapped in an `if false` guard.
    /// Unknown names report as disabled.
    pub fn is_filter_disabled(&self, name: &str) -> bool {
        match self.filters.iter().find(|f| f.name == name) {
            Some(filter) => Self::is_disabled_content(&filter.content),
            None => true,
        }
    }

    fn flatten_into(out: &mut Vec<FilterArg>, value: &ArgValue) {
        match value {
            ArgValue::Str(s) | ArgValue::Number(s) | ArgValue::Tag(s) => {
                out.push(FilterArg::Str(unquote(s).to_string()));
            }
            ArgValue::StrList(items) => {
                out.extend(items.iter().map(|i| FilterArg::Str(unquote(i).to_string())));
            }
            _ => {}
        }
    }

    fn normalized(value: &ArgValue) -> FilterArg {
        match value {
            ArgValue::Str(s) | ArgValue::Number(s) | ArgValue::Tag(s) => {
                FilterArg::Str(unquote(s).to_string())
            }
            ArgValue::StrList(items) => {
                FilterArg::List(items.iter().map(|i| unquote(i).to_string()).collect())
            }
            _ => FilterArg::Str(String::new()),
        }
    }

    fn push_tag_with_extra(out: &mut Vec<FilterArg>, cmd: &Command, slot: &str) {
        if let Some(ArgValue::Tag(tag)) = cmd.arguments.get(slot) {
            out.push(FilterArg::Str(tag.clone()));
            if let Some(extra) = cmd.extra_arguments.get(slot) {
                Self::flatten_into(out, extra);
            }
        }
    }

    /// Reconstruct the flat definition of a single test.
    fn condition_args(cmd: &Command) -> Vec<FilterArg> {
        let mut out = Vec::new();
        match cmd.name() {
            "true" | "false" => out.push(FilterArg::Str(cmd.name().to_string())),
            "size" => {
                out.push(FilterArg::Str("size".to_string()));
                Self::push_tag_with_extra(&mut out, cmd, "operator");
                if let Some(limit) = cmd.arguments.get("limit") {
                    Self::flatten_into(&mut out, limit);
                }
            }
            "exists" => {
                out.push(FilterArg::Str("exists".to_string()));
                if let Some(headers) = cmd.arguments.get("header-names") {
                    Self::flatten_into(&mut out, headers);
                }
            }
            "address" | "envelope" => {
                out.push(FilterArg::Str(cmd.name().to_string()));
                Self::push_tag_with_extra(&mut out, cmd, "match-type");
                if let Some(headers) = cmd.arguments.get("header-list") {
                    out.push(Self::normalized(headers));
                }
                if let Some(values) = cmd.arguments.get("key-list") {
                    out.push(Self::normalized(values));
                }
            }
            "body" => {
                out.push(FilterArg::Str("body".to_string()));
                Self::push_tag_with_extra(&mut out, cmd, "body-transform");
                Self::push_tag_with_extra(&mut out, cmd, "match-type");
                if let Some(values) = cmd.arguments.get("key-list") {
                    Self::flatten_into(&mut out, values);
                }
            }
            "currentdate" => {
                out.push(FilterArg::Str("currentdate".to_string()));
                Self::push_tag_with_extra(&mut out, cmd, "zone");
                Self::push_tag_with_extra(&mut out, cmd, "match-type");
                if let Some(part) = cmd.arguments.get("date-part") {
                    Self::flatten_into(&mut out, part);
                }
                if let Some(values) = cmd.arguments.get("key-list") {
                    Self::flatten_into(&mut out, values);
                }
            }
            "header" => {
                // (headers, operator, values)
                if let Some(headers) = cmd.arguments.get("header-names") {
                    out.push(Self::normalized(headers));
                }
                Self::push_tag_with_extra(&mut out, cmd, "match-type");
                if let Some(values) = cmd.arguments.get("key-list") {
                    out.push(Self::normalized(values));
                }
            }
            _ => {
                out.push(FilterArg::Str(cmd.name().to_string()));
                for slot in &cmd.spec().args {
                    let Some(value) = cmd.arguments.get(&slot.name) else {
                        continue;
                    };
                    match value {
                        ArgValue::Tag(_) => Self::push_tag_with_extra(&mut out, cmd, &slot.name),
                        other => out.push(Self::normalized(other)),
                    }
                }
            }
        }
        out
    }

    /// Inject the negation marker into a reconstructed condition: the
    /// `exists` name becomes `notexists`, otherwise the match-type
    /// operator gains a `not` prefix (`":is"` to `":notis"`).
    fn negate_args(mut args: Vec<FilterArg>) -> Vec<FilterArg> {
        if let Some(FilterArg::Str(first)) = args.first_mut() {
            if first == "exists" {
                *first = "notexists".to_string();
                return args;
            }
        }
        for arg in args.iter_mut() {
            if let FilterArg::Str(s) = arg {
                if MATCH_TYPES.contains(&s.as_str()) {
                    *s = format!(":not{}", &s[1..]);
                    break;
                }
            }
        }
        args
    }

    fn content_tests(content: &Command) -> Vec<&Command> {
        match content.arguments.get("test") {
            Some(ArgValue::Test(container)) if matches!(container.name(), "anyof" | "allof") => {
                match container.arguments.get("tests") {
                    Some(ArgValue::TestList(tests)) => tests.iter().collect(),
                    _ => Vec::new(),
                }
            }
            Some(ArgValue::Test(single)) => vec![single.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Reconstruct the condition definitions of a filter, in order.
    pub fn get_filter_conditions(&self, name: &str) -> Option<Vec<Condition>> {
        let content = self.get_filter(name)?;
        let conditions = Self::content_tests(content)
            .into_iter()
            .map(|test| {
                if test.name() == "not" {
                    if let Some(ArgValue::Test(inner)) = test.arguments.get("test") {
                        return Self::negate_args(Self::condition_args(inner));
                    }
                }
                Self::condition_args(test)
            })
            .collect();
        Some(conditions)
    }

    /// Reconstruct the action definitions of a filter, in order.
    pub fn get_filter_actions(&self, name: &str) -> Option<Vec<Action>> {
        let content = self.get_filter(name)?;
        let actions = content
            .children
            .iter()
            .map(|action| {
                let mut out = vec![FilterArg::Str(action.name().to_string())];
                for slot in &action.spec().args {
                    let Some(value) = action.arguments.get(&slot.name) else {
                        continue;
                    };
                    match value {
                        ArgValue::Tag(_) => {
                            Self::push_tag_with_extra(&mut out, action, &slot.name)
                        }
                        other => out.push(Self::normalized(other)),
                    }
                }
                out
            })
            .collect();
        Some(actions)
    }

    /// How the filter's conditions are combined.
    pub fn get_filter_matchtype(&self, name: &str) -> Option<MatchKind> {
        let content = self.get_filter(name)?;
        match content.arguments.get("test") {
            Some(ArgValue::Test(container)) => match container.name() {
                "anyof" => Some(MatchKind::AnyOf),
                "allof" => Some(MatchKind::AllOf),
                _ => None,
            },
            _ => None,
        }
    }

    /// Populate this set from a parse tree. `require` commands feed the
    /// requirement list; every other top-level command becomes a filter,
    /// named and described by its preceding pretext comments.
    pub fn from_parser(&mut self, parser: &mut Parser) {
        let mut counter = 1;
        for cmd in parser.take_result() {
            if cmd.name() == "require" {
                match cmd.arguments.get("capabilities") {
                    Some(ArgValue::Str(ext)) => self.require(ext),
                    Some(ArgValue::StrList(exts)) => {
                        for ext in exts.clone() {
                            self.require(&ext);
                        }
                    }
                    _ => {}
                }
                continue;
            }
            let mut name = None;
            let mut description = None;
            for comment in &cmd.hash_comments {
                if let Some(rest) = comment.strip_prefix(&self.filter_name_pretext) {
                    name = Some(rest.to_string());
                } else if let Some(rest) = comment.strip_prefix(&self.filter_desc_pretext) {
                    description = Some(rest.to_string());
                }
            }
            let name = name.unwrap_or_else(|| format!("Unnamed rule {counter}"));
            let enabled = !Self::is_disabled_content(&cmd);
            self.filters.push(Filter {
                name,
                description,
                content: cmd,
                enabled,
            });
            counter += 1;
        }
    }

    /// Emit the whole set as SIEVE text: the shared `require` line, then
    /// each filter preceded by its pretext comments.
    pub fn to_sieve(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        if !self.requires.is_empty() {
            out.write_str("require [")?;
            for (i, ext) in self.requires.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write!(out, "\"{ext}\"")?;
            }
            out.write_str("];\n\n")?;
        }
        for filter in &self.filters {
            writeln!(out, "{}{}", self.filter_name_pretext, filter.name)?;
            if let Some(description) = &filter.description {
                writeln!(out, "{}{}", self.filter_desc_pretext, description)?;
            }
            filter.content.to_sieve(out, 0)?;
        }
        Ok(())
    }

    /// Structural dump for debugging.
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Filter set: {}", self.name)?;
        if !self.requires.is_empty() {
            writeln!(out, "Requires: {}", self.requires.join(", "))?;
        }
        for filter in &self.filters {
            let state = if filter.enabled { "enabled" } else { "disabled" };
            writeln!(out, "Filter {} ({state})", filter.name)?;
            filter.content.dump(out, 4)?;
        }
        Ok(())
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_sieve(f)
    }
}
