//! SIEVE command model.
//!
//! Every known command is described by a declarative [`CommandSpec`]: its
//! kind (control, action or test), its argument slots and the extensions
//! gating it. A [`Registry`] maps command names to specs and can be
//! extended at runtime. [`Command`] instances bind incoming tokens against
//! their spec one slot at a time, which is what lets the parser stay
//! generic over the whole catalogue.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::lexer::TokenKind;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("bad argument {seen} for command {command} ({expected} expected)")]
    BadArgument {
        command: String,
        seen: String,
        expected: String,
    },
    #[error("bad value {value} for argument {argument}")]
    BadValue { argument: String, value: String },
    #[error("extension '{0}' not loaded")]
    ExtensionNotLoaded(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Control,
    Action,
    Test,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandKind::Control => "control",
            CommandKind::Action => "action",
            CommandKind::Test => "test",
        })
    }
}

/// Types an argument slot can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    StringList,
    Number,
    Tag,
    Test,
    TestList,
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgType::String => "string",
            ArgType::StringList => "stringlist",
            ArgType::Number => "number",
            ArgType::Tag => "tag",
            ArgType::Test => "test",
            ArgType::TestList => "testlist",
        })
    }
}

/// A value bound to an argument slot.
///
/// Strings coming from the parser keep their source form (surrounding
/// quotes, or the whole `text:` literal); factory-built values are bare.
/// Serialisation and introspection normalise both forms.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Str(String),
    Number(String),
    Tag(String),
    StrList(Vec<String>),
    Test(Box<Command>),
    TestList(Vec<Command>),
}

impl ArgValue {
    pub fn arg_type(&self) -> ArgType {
        match self {
            ArgValue::Str(_) => ArgType::String,
            ArgValue::Number(_) => ArgType::Number,
            ArgValue::Tag(_) => ArgType::Tag,
            ArgValue::StrList(_) => ArgType::StringList,
            ArgValue::Test(_) => ArgType::Test,
            ArgValue::TestList(_) => ArgType::TestList,
        }
    }

    fn display_value(&self) -> String {
        match self {
            ArgValue::Str(s) | ArgValue::Number(s) | ArgValue::Tag(s) => s.clone(),
            ArgValue::StrList(items) => format!("[{}]", items.join(",")),
            ArgValue::Test(cmd) => cmd.name().to_string(),
            ArgValue::TestList(_) => "(...)".to_string(),
        }
    }
}

/// Strip one level of surrounding double quotes.
pub(crate) fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
}

/// Schema of the value following a matched tag (e.g. the string after
/// `:comparator`).
#[derive(Debug, Clone)]
pub struct ExtraArg {
    pub types: Vec<ArgType>,
    pub values: Vec<String>,
    /// Tag values that actually carry this extra argument; empty means all.
    pub valid_for: Vec<String>,
}

impl ExtraArg {
    pub fn new(types: &[ArgType]) -> Self {
        Self {
            types: types.to_vec(),
            values: Vec::new(),
            valid_for: Vec::new(),
        }
    }

    pub fn values(mut self, values: &[&str]) -> Self {
        self.values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn valid_for(mut self, tags: &[&str]) -> Self {
        self.valid_for = tags.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// One argument slot of a command schema.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub types: Vec<ArgType>,
    pub required: bool,
    /// Closed set of allowed literal values; empty means unrestricted.
    pub values: Vec<String>,
    /// Additional allowed values, each unlocked by an extension.
    pub extension_values: Vec<(String, String)>,
    pub extra_arg: Option<ExtraArg>,
    /// Extension unlocking this whole slot.
    pub extension: Option<String>,
}

impl ArgSpec {
    pub fn new(name: &str, types: &[ArgType]) -> Self {
        Self {
            name: name.to_string(),
            types: types.to_vec(),
            required: false,
            values: Vec::new(),
            extension_values: Vec::new(),
            extra_arg: None,
            extension: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn values(mut self, values: &[&str]) -> Self {
        self.values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn extension_values(mut self, values: &[(&str, &str)]) -> Self {
        self.extension_values = values
            .iter()
            .map(|(v, e)| (v.to_string(), e.to_string()))
            .collect();
        self
    }

    pub fn extra(mut self, extra: ExtraArg) -> Self {
        self.extra_arg = Some(extra);
        self
    }

    pub fn extension(mut self, name: &str) -> Self {
        self.extension = Some(name.to_string());
        self
    }

    fn types_display(&self) -> String {
        self.types
            .iter()
            .map(ArgType::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Declarative description of a command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub kind: CommandKind,
    pub args: Vec<ArgSpec>,
    pub accept_children: bool,
    /// Test-list commands (`anyof`, `allof`) take an open-ended number of
    /// arguments and only complete when their parenthesis closes.
    pub variable_args_nb: bool,
    /// Argument binding is ambiguous until the command terminates
    /// (`hasflag`); resolved by [`Command::reassign_arguments`].
    pub non_deterministic_args: bool,
    /// Names the preceding sibling must have; empty means unrestricted.
    pub must_follow: Vec<String>,
    /// Extension gating the whole command.
    pub extension: Option<String>,
    /// Token kinds required right after the command name, when the grammar
    /// pins them (`if`/`not` need a test identifier, `anyof` a `(`).
    pub expected_first: Vec<TokenKind>,
}

impl CommandSpec {
    pub fn new(name: &str, kind: CommandKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            args: Vec::new(),
            accept_children: false,
            variable_args_nb: false,
            non_deterministic_args: false,
            must_follow: Vec::new(),
            extension: None,
            expected_first: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn accept_children(mut self) -> Self {
        self.accept_children = true;
        self
    }

    pub fn variable_args(mut self) -> Self {
        self.variable_args_nb = true;
        self
    }

    pub fn non_deterministic(mut self) -> Self {
        self.non_deterministic_args = true;
        self
    }

    pub fn must_follow(mut self, names: &[&str]) -> Self {
        self.must_follow = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn extension(mut self, name: &str) -> Self {
        self.extension = Some(name.to_string());
        self
    }

    pub fn expects_first(mut self, kinds: &[TokenKind]) -> Self {
        self.expected_first = kinds.to_vec();
        self
    }
}

/// Command catalogue: name to spec, extensible at runtime.
#[derive(Debug, Clone)]
pub struct Registry {
    specs: HashMap<String, Arc<CommandSpec>>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Registry {
            specs: HashMap::new(),
        };
        for spec in builtin_specs() {
            registry.register(spec);
        }
        registry
    }
}

impl Registry {
    pub fn register(&mut self, spec: CommandSpec) {
        self.specs
            .insert(spec.name.to_ascii_lowercase(), Arc::new(spec));
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<CommandSpec>> {
        self.specs.get(&name.to_ascii_lowercase())
    }

    /// Create a fresh command instance. With `check_exists`, a command
    /// gated behind an extension that is not in `loaded` is reported as
    /// unknown, exactly like a name with no spec at all.
    pub fn instantiate(
        &self,
        name: &str,
        check_exists: bool,
        loaded: &[String],
    ) -> Result<Command, CommandError> {
        let spec = self
            .lookup(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        if check_exists {
            if let Some(ext) = &spec.extension {
                if !loaded.iter().any(|e| e == ext) {
                    return Err(CommandError::UnknownCommand(name.to_string()));
                }
            }
        }
        Ok(Command::new(Arc::clone(spec)))
    }
}

enum SlotMatch {
    NotAccepted,
    Extra(usize),
    Required(usize),
    Optional(usize),
    TestListAppend(usize),
}

/// A command instance: a spec plus the values bound to it so far.
#[derive(Debug, Clone)]
pub struct Command {
    spec: Arc<CommandSpec>,
    pub arguments: HashMap<String, ArgValue>,
    /// Values trailing a matched tag, keyed by the tag's slot name.
    pub extra_arguments: HashMap<String, ArgValue>,
    pub children: Vec<Command>,
    /// Hash comments seen right before this command at top level.
    pub hash_comments: Vec<String>,
    next_arg_pos: usize,
    required_bound: usize,
    pending_extra: Option<usize>,
    closed: bool,
}

impl Command {
    pub fn new(spec: Arc<CommandSpec>) -> Self {
        Self {
            spec,
            arguments: HashMap::new(),
            extra_arguments: HashMap::new(),
            children: Vec::new(),
            hash_comments: Vec::new(),
            next_arg_pos: 0,
            required_bound: 0,
            pending_extra: None,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> CommandKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn required_total(&self) -> usize {
        self.spec.args.iter().filter(|a| a.required).count()
    }

    /// All required slots bound and no extra-argument pending. Test-list
    /// commands only complete once their parenthesis has closed.
    pub fn is_complete(&self) -> bool {
        if self.spec.variable_args_nb {
            return self.closed;
        }
        self.pending_extra.is_none() && self.required_bound >= self.required_total()
    }

    /// Mark a test-list command as terminated by its closing parenthesis.
    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub fn add_child(&mut self, child: Command) -> bool {
        if !self.spec.accept_children {
            return false;
        }
        self.children.push(child);
        true
    }

    fn value_allowed(
        &self,
        slot: &ArgSpec,
        avalue: &str,
        check_extension: bool,
        loaded: &[String],
    ) -> Result<bool, CommandError> {
        if slot.values.is_empty() && slot.extension_values.is_empty() {
            return Ok(true);
        }
        let lowered = avalue.to_ascii_lowercase();
        if slot.values.iter().any(|v| *v == lowered) {
            return Ok(true);
        }
        if let Some((_, ext)) = slot.extension_values.iter().find(|(v, _)| *v == lowered) {
            if check_extension && !loaded.iter().any(|e| e == ext) {
                return Err(CommandError::ExtensionNotLoaded(ext.clone()));
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn slot_extension_ok(
        &self,
        slot: &ArgSpec,
        check_extension: bool,
        loaded: &[String],
    ) -> Result<(), CommandError> {
        if let Some(ext) = &slot.extension {
            if check_extension && !loaded.iter().any(|e| e == ext) {
                return Err(CommandError::ExtensionNotLoaded(ext.clone()));
            }
        }
        Ok(())
    }

    fn find_slot(
        &self,
        atype: ArgType,
        avalue: &str,
        check_extension: bool,
        loaded: &[String],
    ) -> Result<SlotMatch, CommandError> {
        if self.spec.args.is_empty() || self.is_complete() {
            return Ok(SlotMatch::NotAccepted);
        }

        if let Some(idx) = self.pending_extra {
            let slot = &self.spec.args[idx];
            if let Some(extra) = &slot.extra_arg {
                let value_ok = extra.values.is_empty()
                    || extra
                        .values
                        .iter()
                        .any(|v| *v == avalue.to_ascii_lowercase());
                if extra.types.contains(&atype) && value_ok {
                    return Ok(SlotMatch::Extra(idx));
                }
            }
            return Err(CommandError::BadValue {
                argument: slot.name.clone(),
                value: avalue.to_string(),
            });
        }

        let mut pos = self.next_arg_pos;
        while pos < self.spec.args.len() {
            let slot = &self.spec.args[pos];
            if slot.required {
                if slot.types.contains(&ArgType::TestList) {
                    if atype != ArgType::Test {
                        return Err(CommandError::BadArgument {
                            command: self.name().to_string(),
                            seen: avalue.to_string(),
                            expected: slot.types_display(),
                        });
                    }
                    return Ok(SlotMatch::TestListAppend(pos));
                }
                if !slot.types.contains(&atype)
                    || !self.value_allowed(slot, avalue, check_extension, loaded)?
                {
                    return Err(CommandError::BadArgument {
                        command: self.name().to_string(),
                        seen: avalue.to_string(),
                        expected: slot.types_display(),
                    });
                }
                self.slot_extension_ok(slot, check_extension, loaded)?;
                return Ok(SlotMatch::Required(pos));
            }

            if slot.types.contains(&atype)
                && !self.arguments.contains_key(&slot.name)
                && self.value_allowed(slot, avalue, check_extension, loaded)?
            {
                self.slot_extension_ok(slot, check_extension, loaded)?;
                return Ok(SlotMatch::Optional(pos));
            }
            pos += 1;
        }
        Ok(SlotMatch::NotAccepted)
    }

    /// Try to bind the next incoming value to this command's next eligible
    /// slot. Returns `Ok(false)` when the command does not accept it (for
    /// instance because it is already complete); errors carry the precise
    /// rejection reason. With `add` unset the binding is only validated.
    pub fn check_next_arg(
        &mut self,
        value: ArgValue,
        add: bool,
        check_extension: bool,
        loaded: &[String],
    ) -> Result<bool, CommandError> {
        let matched = self.find_slot(value.arg_type(), &value.display_value(), check_extension, loaded)?;
        match matched {
            SlotMatch::NotAccepted => Ok(false),
            _ if !add => Ok(true),
            SlotMatch::Extra(idx) => {
                let name = self.spec.args[idx].name.clone();
                self.extra_arguments.insert(name, value);
                self.pending_extra = None;
                Ok(true)
            }
            SlotMatch::Required(idx) => {
                let name = self.spec.args[idx].name.clone();
                self.arguments.insert(name, value);
                self.required_bound += 1;
                self.next_arg_pos = idx + 1;
                Ok(true)
            }
            SlotMatch::Optional(idx) => {
                let slot = &self.spec.args[idx];
                let name = slot.name.clone();
                let carries_extra = slot.extra_arg.as_ref().is_some_and(|extra| {
                    extra.valid_for.is_empty()
                        || extra
                            .valid_for
                            .iter()
                            .any(|t| *t == value.display_value().to_ascii_lowercase())
                });
                self.arguments.insert(name, value);
                if carries_extra {
                    self.pending_extra = Some(idx);
                }
                Ok(true)
            }
            SlotMatch::TestListAppend(idx) => {
                let name = self.spec.args[idx].name.clone();
                if let ArgValue::Test(test) = value {
                    match self
                        .arguments
                        .entry(name)
                        .or_insert_with(|| ArgValue::TestList(Vec::new()))
                    {
                        ArgValue::TestList(tests) => tests.push(*test),
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
        }
    }

    /// Deferred disambiguation for commands whose argument layout is only
    /// decidable at termination: a lone bound optional slot shifts into the
    /// next unbound required slot sharing a type (`hasflag`'s variable
    /// list versus flag list).
    pub fn reassign_arguments(&mut self) {
        if !self.spec.non_deterministic_args {
            return;
        }
        for idx in 0..self.spec.args.len() {
            let opt_slot = &self.spec.args[idx];
            if opt_slot.required || !self.arguments.contains_key(&opt_slot.name) {
                continue;
            }
            let Some(req_slot) = self.spec.args[idx + 1..].iter().find(|s| s.required) else {
                continue;
            };
            if self.arguments.contains_key(&req_slot.name) {
                continue;
            }
            if opt_slot.types.iter().any(|t| req_slot.types.contains(t)) {
                let opt_name = opt_slot.name.clone();
                let req_name = req_slot.name.clone();
                if let Some(value) = self.arguments.remove(&opt_name) {
                    self.arguments.insert(req_name, value);
                    self.required_bound += 1;
                }
            }
        }
    }

    /// Completion hook fired by the parser. `require` feeds its capability
    /// strings into the active extension set.
    pub(crate) fn on_complete(&self, loaded: &mut Vec<String>) {
        if self.name() != "require" {
            return;
        }
        let mut push = |raw: &str| {
            let ext = unquote(raw).to_string();
            if !loaded.contains(&ext) {
                loaded.push(ext);
            }
        };
        match self.arguments.get("capabilities") {
            Some(ArgValue::Str(s)) => push(s),
            Some(ArgValue::StrList(items)) => items.iter().for_each(|s| push(s)),
            _ => {}
        }
    }

    fn write_scalar(out: &mut dyn fmt::Write, value: &ArgValue) -> fmt::Result {
        match value {
            ArgValue::Str(s) => write!(out, "\"{}\"", unquote(s)),
            ArgValue::Number(n) => out.write_str(n),
            ArgValue::Tag(t) => out.write_str(t),
            ArgValue::StrList(items) => Self::write_string_list(out, items),
            _ => Ok(()),
        }
    }

    fn write_string_list(out: &mut dyn fmt::Write, items: &[String]) -> fmt::Result {
        out.write_char('[')?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "\"{}\"", unquote(item))?;
        }
        out.write_char(']')
    }

    /// Render the command name and arguments, without indentation or
    /// terminator. Returns whether the last argument was a multiline
    /// literal, which must keep its closing dot on its own line.
    fn write_head(&self, out: &mut dyn fmt::Write) -> Result<bool, fmt::Error> {
        out.write_str(self.name())?;
        let mut multiline_tail = false;
        for slot in &self.spec.args {
            let Some(value) = self.arguments.get(&slot.name) else {
                continue;
            };
            out.write_char(' ')?;
            multiline_tail = false;
            match value {
                ArgValue::Tag(tag) => {
                    out.write_str(tag)?;
                    if let Some(extra) = self.extra_arguments.get(&slot.name) {
                        out.write_char(' ')?;
                        Self::write_scalar(out, extra)?;
                    }
                }
                ArgValue::Str(s) if s.starts_with("text:") => {
                    out.write_str(s)?;
                    multiline_tail = true;
                }
                ArgValue::Str(s) => write!(out, "\"{}\"", unquote(s))?,
                ArgValue::Number(n) => out.write_str(n)?,
                ArgValue::StrList(items) => Self::write_string_list(out, items)?,
                ArgValue::Test(test) => {
                    multiline_tail = test.write_head(out)?;
                }
                ArgValue::TestList(tests) => {
                    out.write_char('(')?;
                    for (i, test) in tests.iter().enumerate() {
                        if i > 0 {
                            out.write_str(", ")?;
                        }
                        test.write_head(out)?;
                    }
                    out.write_char(')')?;
                }
            }
        }
        Ok(multiline_tail)
    }

    /// Render this command and its subtree as SIEVE text.
    pub fn to_sieve(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        write!(out, "{:width$}", "", width = indent)?;
        let multiline_tail = self.write_head(out)?;
        if self.spec.accept_children {
            if self.kind() == CommandKind::Control {
                out.write_str(" {\n")?;
                for child in &self.children {
                    child.to_sieve(out, indent + 4)?;
                }
                writeln!(out, "{:width$}}}", "", width = indent)?;
            }
            return Ok(());
        }
        if self.kind() != CommandKind::Test {
            if multiline_tail {
                out.write_str("\n;\n")?;
            } else {
                out.write_str(";\n")?;
            }
        }
        Ok(())
    }

    /// Structural debug rendering: one `name (type: kind)` line per
    /// command, argument values and children indented by four.
    pub fn dump(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        writeln!(out, "{:w$}{} (type: {})", "", self.name(), self.kind(), w = indent)?;
        let inner = indent + 4;
        for slot in &self.spec.args {
            let Some(value) = self.arguments.get(&slot.name) else {
                continue;
            };
            match value {
                ArgValue::Str(s) | ArgValue::Number(s) | ArgValue::Tag(s) => {
                    writeln!(out, "{:w$}{}", "", s, w = inner)?;
                    if let Some(extra) = self.extra_arguments.get(&slot.name) {
                        writeln!(out, "{:w$}{}", "", extra.display_value(), w = inner)?;
                    }
                }
                ArgValue::StrList(items) => {
                    writeln!(out, "{:w$}[{}]", "", items.join(","), w = inner)?;
                }
                ArgValue::Test(test) => test.dump(out, inner)?,
                ArgValue::TestList(tests) => {
                    for test in tests {
                        test.dump(out, inner)?;
                    }
                }
            }
        }
        for child in &self.children {
            child.dump(out, inner)?;
        }
        Ok(())
    }

    /// Pre-order traversal over this command, its argument-carried
    /// sub-commands and its children. Every node is yielded exactly once.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a Command>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Command;

    fn next(&mut self) -> Option<Self::Item> {
        let cmd = self.stack.pop()?;
        for child in cmd.children.iter().rev() {
            self.stack.push(child);
        }
        for slot in cmd.spec.args.iter().rev() {
            match cmd.arguments.get(&slot.name) {
                Some(ArgValue::Test(test)) => self.stack.push(test.as_ref()),
                Some(ArgValue::TestList(tests)) => {
                    for test in tests.iter().rev() {
                        self.stack.push(test);
                    }
                }
                _ => {}
            }
        }
        Some(cmd)
    }
}

fn comparator_slot() -> ArgSpec {
    ArgSpec::new("comparator", &[ArgType::Tag])
        .values(&[":comparator"])
        .extra(ExtraArg::new(&[ArgType::String]).values(&["\"i;octet\"", "\"i;ascii-casemap\""]))
}

fn address_part_slot() -> ArgSpec {
    ArgSpec::new("address-part", &[ArgType::Tag]).values(&[":localpart", ":domain", ":all"])
}

fn match_type_slot() -> ArgSpec {
    ArgSpec::new("match-type", &[ArgType::Tag])
        .values(&[":is", ":contains", ":matches"])
        .extension_values(&[
            (":count", "relational"),
            (":value", "relational"),
            (":regex", "regex"),
        ])
        .extra(ExtraArg::new(&[ArgType::String]).valid_for(&[":count", ":value"]))
}

fn zone_slot() -> ArgSpec {
    ArgSpec::new("zone", &[ArgType::Tag])
        .values(&[":zone", ":originalzone"])
        .extra(ExtraArg::new(&[ArgType::String]).valid_for(&[":zone"]))
}

fn string_or_list(name: &str) -> ArgSpec {
    ArgSpec::new(name, &[ArgType::String, ArgType::StringList])
}

fn tagged(name: &str, tag: &str) -> ArgSpec {
    ArgSpec::new(name, &[ArgType::Tag]).values(&[tag])
}

fn builtin_specs() -> Vec<CommandSpec> {
    use ArgType::{Number, String, StringList, Tag, Test, TestList};
    use CommandKind::{Action, Control};
    use TokenKind::{Identifier, LeftParenthesis};

    let test = |name: &str| CommandSpec::new(name, CommandKind::Test);

    vec![
        // Controls.
        CommandSpec::new("require", Control)
            .arg(string_or_list("capabilities").required()),
        CommandSpec::new("stop", Control),
        CommandSpec::new("if", Control)
            .accept_children()
            .expects_first(&[Identifier])
            .arg(ArgSpec::new("test", &[Test]).required()),
        CommandSpec::new("elsif", Control)
            .accept_children()
            .must_follow(&["if", "elsif"])
            .expects_first(&[Identifier])
            .arg(ArgSpec::new("test", &[Test]).required()),
        CommandSpec::new("else", Control)
            .accept_children()
            .must_follow(&["if", "elsif"]),
        CommandSpec::new("set", Control)
            .extension("variables")
            .arg(ArgSpec::new("name", &[String]).required())
            .arg(ArgSpec::new("value", &[String]).required()),
        // Actions.
        CommandSpec::new("keep", Action),
        CommandSpec::new("discard", Action),
        CommandSpec::new("fileinto", Action)
            .extension("fileinto")
            .arg(tagged("copy", ":copy").extension("copy"))
            .arg(tagged("create", ":create").extension("mailbox"))
            .arg(
                tagged("flags", ":flags")
                    .extension("imap4flags")
                    .extra(ExtraArg::new(&[String, StringList])),
            )
            .arg(ArgSpec::new("mailbox", &[String]).required()),
        CommandSpec::new("redirect", Action)
            .arg(tagged("copy", ":copy").extension("copy"))
            .arg(ArgSpec::new("address", &[String]).required()),
        CommandSpec::new("reject", Action)
            .extension("reject")
            .arg(ArgSpec::new("text", &[String]).required()),
        CommandSpec::new("vacation", Action)
            .extension("vacation")
            .arg(tagged("subject", ":subject").extra(ExtraArg::new(&[String])))
            .arg(tagged("days", ":days").extra(ExtraArg::new(&[Number])))
            .arg(
                tagged("seconds", ":seconds")
                    .extension("vacation-seconds")
                    .extra(ExtraArg::new(&[Number])),
            )
            .arg(tagged("from", ":from").extra(ExtraArg::new(&[String])))
            .arg(tagged("addresses", ":addresses").extra(ExtraArg::new(&[String, StringList])))
            .arg(tagged("handle", ":handle").extra(ExtraArg::new(&[String])))
            .arg(tagged("mime", ":mime"))
            .arg(ArgSpec::new("reason", &[String]).required()),
        CommandSpec::new("setflag", Action)
            .extension("imap4flags")
            .arg(string_or_list("flags").required()),
        CommandSpec::new("addflag", Action)
            .extension("imap4flags")
            .arg(string_or_list("flags").required()),
        CommandSpec::new("removeflag", Action)
            .extension("imap4flags")
            .arg(string_or_list("flags").required()),
        // Tests.
        test("address")
            .arg(comparator_slot())
            .arg(address_part_slot())
            .arg(match_type_slot())
            .arg(string_or_list("header-list").required())
            .arg(string_or_list("key-list").required()),
        test("allof")
            .accept_children()
            .variable_args()
            .expects_first(&[LeftParenthesis])
            .arg(ArgSpec::new("tests", &[TestList]).required()),
        test("anyof")
            .accept_children()
            .variable_args()
            .expects_first(&[LeftParenthesis])
            .arg(ArgSpec::new("tests", &[TestList]).required()),
        test("envelope")
            .extension("envelope")
            .arg(comparator_slot())
            .arg(address_part_slot())
            .arg(match_type_slot())
            .arg(string_or_list("header-list").required())
            .arg(string_or_list("key-list").required()),
        test("exists")
            .arg(string_or_list("header-names").required()),
        test("true"),
        test("false"),
        test("header")
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(string_or_list("header-names").required())
            .arg(string_or_list("key-list").required()),
        test("not")
            .accept_children()
            .expects_first(&[Identifier])
            .arg(ArgSpec::new("test", &[Test]).required()),
        test("size")
            .arg(
                ArgSpec::new("operator", &[Tag])
                    .values(&[":over", ":under"])
                    .required(),
            )
            .arg(ArgSpec::new("limit", &[Number]).required()),
        test("hasflag")
            .extension("imap4flags")
            .non_deterministic()
            .arg(match_type_slot())
            .arg(string_or_list("variable-list"))
            .arg(string_or_list("list-of-flags").required()),
        test("body")
            .extension("body")
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(
                ArgSpec::new("body-transform", &[Tag])
                    .values(&[":raw", ":content", ":text"])
                    .extra(ExtraArg::new(&[String, StringList]).valid_for(&[":content"])),
            )
            .arg(string_or_list("key-list").required()),
        test("date")
            .extension("date")
            .arg(comparator_slot())
            .arg(zone_slot())
            .arg(match_type_slot())
            .arg(ArgSpec::new("header-name", &[String]).required())
            .arg(ArgSpec::new("date-part", &[String]).required())
            .arg(string_or_list("key-list").required()),
        test("currentdate")
            .extension("date")
            .arg(comparator_slot())
            .arg(zone_slot())
            .arg(match_type_slot())
            .arg(ArgSpec::new("date-part", &[String]).required())
            .arg(string_or_list("key-list").required()),
    ]
}
