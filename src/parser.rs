//! Grammar-driven parser for SIEVE scripts.
//!
//! The parser drives the lexer and maintains a stack of open commands; a
//! completed test is popped and bound into the test slot of the command
//! below it, so the tree is owned top-down and needs no parent pointers.
//! The set of loaded extensions is parser state, reset at the start of
//! every parse and fed by `require` commands as they complete.

use std::fmt;

use thiserror::Error;

use crate::command::{ArgValue, Command, CommandError, CommandKind, Registry};
use crate::lexer::{Lexer, ScanError, Token, TokenKind};

/// A located parse failure. Displays as `line N: message`, matching the
/// diagnostics the rest of the crate reports to users.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    message: String,
    line: usize,
    col: usize,
    length: usize,
}

impl ParseError {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `(line, column, token length)`, 1-based, for highlighting.
    pub fn position(&self) -> (usize, usize, usize) {
        (self.line, self.col, self.length)
    }
}

enum Fail {
    Scan(ScanError),
    Command {
        err: CommandError,
        offset: usize,
        len: usize,
    },
    Syntax {
        msg: String,
        offset: usize,
        len: usize,
    },
    Eof {
        msg: String,
    },
}

impl Fail {
    fn syntax(msg: String, token: &Token<'_>) -> Self {
        Fail::Syntax {
            msg,
            offset: token.offset,
            len: token.lexeme.len(),
        }
    }

    fn command(err: CommandError, token: &Token<'_>) -> Self {
        Fail::Command {
            err,
            offset: token.offset,
            len: token.lexeme.len(),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CState {
    /// Between commands: expecting a command name or a block close.
    Command,
    /// Collecting the current command's arguments.
    Arguments,
    /// Inside a bracketed string list.
    StringList,
}

struct StackEntry {
    cmd: Command,
    in_block: bool,
}

struct Bracket {
    close: TokenKind,
}

/// SIEVE parser. Reusable: every call to [`Parser::parse`] starts from a
/// clean state.
pub struct Parser {
    registry: Registry,
    result: Vec<Command>,
    loaded_extensions: Vec<String>,
    hash_comments: Vec<String>,
    stack: Vec<StackEntry>,
    cstate: CState,
    cur_stringlist: Vec<String>,
    expected: Vec<TokenKind>,
    bracket_stack: Vec<Bracket>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::with_registry(Registry::default())
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            result: Vec::new(),
            loaded_extensions: Vec::new(),
            hash_comments: Vec::new(),
            stack: Vec::new(),
            cstate: CState::Command,
            cur_stringlist: Vec::new(),
            expected: Vec::new(),
            bracket_stack: Vec::new(),
        }
    }

    /// Register additional commands for subsequent parses.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Top-level commands of the last successful parse.
    pub fn result(&self) -> &[Command] {
        &self.result
    }

    /// Hand the parse tree over, leaving the parser empty.
    pub fn take_result(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.result)
    }

    /// Extensions loaded by `require` during the last parse.
    pub fn loaded_extensions(&self) -> &[String] {
        &self.loaded_extensions
    }

    fn reset(&mut self) {
        self.result.clear();
        self.loaded_extensions.clear();
        self.hash_comments.clear();
        self.stack.clear();
        self.cstate = CState::Command;
        self.cur_stringlist.clear();
        self.expected.clear();
        self.bracket_stack.clear();
    }

    /// Parse a complete script. On success the tree is available through
    /// [`Parser::result`]; on failure the tree is left empty and the error
    /// carries the diagnostic with its position.
    pub fn parse(&mut self, src: &str) -> Result<(), ParseError> {
        self.reset();
        let mut lexer = Lexer::new(src);
        match self.parse_inner(&mut lexer) {
            Ok(()) => Ok(()),
            Err(fail) => {
                self.result.clear();
                let (msg, offset, len) = match fail {
                    Fail::Scan(err) => {
                        let offset = err.offset;
                        (err.to_string(), offset, 1)
                    }
                    Fail::Command { err, offset, len } => (err.to_string(), offset, len),
                    Fail::Syntax { msg, offset, len } => (msg, offset, len),
                    Fail::Eof { msg } => (msg, src.len(), 0),
                };
                let (line, col) = lexer.line_col(offset);
                Err(ParseError {
                    message: msg,
                    line,
                    col,
                    length: len,
                })
            }
        }
    }

    fn parse_inner(&mut self, lexer: &mut Lexer<'_>) -> Result<(), Fail> {
        while let Some(token) = lexer.next_token().map_err(Fail::Scan)? {
            match token.kind {
                TokenKind::HashComment => {
                    self.hash_comments.push(token.lexeme.to_string());
                    continue;
                }
                TokenKind::BracketComment => continue,
                _ => {}
            }
            self.process(&token)?;
        }

        if let Some(bracket) = self.bracket_stack.last() {
            return Err(Fail::Eof {
                msg: format!("end of script reached while {} expected", bracket.close),
            });
        }
        if !self.expected.is_empty() {
            return Err(Fail::Eof {
                msg: format!(
                    "end of script reached while {} expected",
                    join_kinds(&self.expected)
                ),
            });
        }
        if let Some(entry) = self.stack.last() {
            return Err(Fail::Eof {
                msg: format!(
                    "end of script reached before command {} was terminated",
                    entry.cmd.name()
                ),
            });
        }
        Ok(())
    }

    fn process(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        if !self.expected.is_empty() {
            if !self.expected.contains(&token.kind) {
                return Err(Fail::syntax(
                    format!(
                        "{} found while {} expected",
                        token.kind,
                        join_kinds(&self.expected)
                    ),
                    token,
                ));
            }
            self.expected.clear();
        }
        self.track_brackets(token)?;
        self.dispatch(token)
    }

    fn track_brackets(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        let open = |close| Bracket { close };
        match token.kind {
            TokenKind::LeftBracket => self.bracket_stack.push(open(TokenKind::RightBracket)),
            TokenKind::LeftParenthesis => {
                self.bracket_stack.push(open(TokenKind::RightParenthesis))
            }
            TokenKind::LeftCBracket => self.bracket_stack.push(open(TokenKind::RightCBracket)),
            TokenKind::RightBracket | TokenKind::RightParenthesis | TokenKind::RightCBracket => {
                match self.bracket_stack.last() {
                    Some(bracket) if bracket.close == token.kind => {
                        self.bracket_stack.pop();
                    }
                    Some(bracket) => {
                        return Err(Fail::syntax(
                            format!("{} found while {} expected", token.kind, bracket.close),
                            token,
                        ));
                    }
                    None => {
                        return Err(Fail::syntax(
                            format!("unexpected token '{}'", token.lexeme),
                            token,
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        // Commands with non-deterministic argument layouts get a deferred
        // resolution pass when a terminator reaches them, then the token is
        // re-dispatched through the new state.
        if self.cstate == CState::Arguments
            && matches!(
                token.kind,
                TokenKind::Semicolon
                    | TokenKind::Comma
                    | TokenKind::RightParenthesis
                    | TokenKind::LeftCBracket
            )
        {
            let needs_pass = self
                .stack
                .last()
                .map(|e| e.cmd.spec().non_deterministic_args && !e.cmd.is_complete())
                .unwrap_or(false);
            if needs_pass {
                if let Some(entry) = self.stack.last_mut() {
                    entry.cmd.reassign_arguments();
                }
                let now_complete = self
                    .stack
                    .last()
                    .map(|e| e.cmd.is_complete())
                    .unwrap_or(false);
                if now_complete {
                    self.check_completion(false, token)?;
                    if !self.expected.is_empty() {
                        if !self.expected.contains(&token.kind) {
                            return Err(Fail::syntax(
                                format!(
                                    "{} found while {} expected",
                                    token.kind,
                                    join_kinds(&self.expected)
                                ),
                                token,
                            ));
                        }
                        self.expected.clear();
                    }
                }
            }
        }

        match self.cstate {
            CState::Command => self.command_token(token),
            CState::Arguments => self.arguments_token(token),
            CState::StringList => self.stringlist_token(token),
        }
    }

    fn command_token(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        match token.kind {
            TokenKind::RightCBracket => self.close_block(token),
            TokenKind::Identifier => {
                let cmd = self
                    .registry
                    .instantiate(token.lexeme, true, &self.loaded_extensions)
                    .map_err(|e| Fail::command(e, token))?;
                if cmd.kind() == CommandKind::Test {
                    return Err(Fail::syntax(
                        format!("{} may not appear as a first command", cmd.name()),
                        token,
                    ));
                }
                if let Some(parent) = self.stack.last() {
                    if !parent.cmd.spec().accept_children {
                        return Err(Fail::syntax(
                            format!("{} unexpected after a {}", cmd.name(), parent.cmd.name()),
                            token,
                        ));
                    }
                }
                self.expected = cmd.spec().expected_first.clone();
                self.stack.push(StackEntry {
                    cmd,
                    in_block: false,
                });
                self.cstate = CState::Arguments;
                Ok(())
            }
            _ => Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            )),
        }
    }

    fn arguments_token(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        match token.kind {
            TokenKind::Identifier => {
                let test = self
                    .registry
                    .instantiate(token.lexeme, true, &self.loaded_extensions)
                    .map_err(|e| Fail::command(e, token))?;
                let Some(top) = self.stack.last_mut() else {
                    return Err(Fail::syntax("no open command".into(), token));
                };
                if test.kind() != CommandKind::Test {
                    return Err(Fail::command(
                        CommandError::BadArgument {
                            command: top.cmd.name().to_string(),
                            seen: test.name().to_string(),
                            expected: "test".to_string(),
                        },
                        token,
                    ));
                }
                let accepted = top
                    .cmd
                    .check_next_arg(
                        ArgValue::Test(Box::new(test.clone())),
                        false,
                        true,
                        &self.loaded_extensions,
                    )
                    .map_err(|e| Fail::command(e, token))?;
                if !accepted {
                    return Err(Fail::syntax(
                        format!("unexpected token '{}'", token.lexeme),
                        token,
                    ));
                }
                self.expected = test.spec().expected_first.clone();
                self.stack.push(StackEntry {
                    cmd: test,
                    in_block: false,
                });
                self.check_completion(false, token)
            }
            TokenKind::LeftParenthesis | TokenKind::Comma => {
                self.expected = vec![TokenKind::Identifier];
                Ok(())
            }
            TokenKind::RightParenthesis => self.close_testlist(token),
            TokenKind::LeftBracket => {
                self.cstate = CState::StringList;
                self.cur_stringlist.clear();
                self.expected = vec![TokenKind::String];
                Ok(())
            }
            TokenKind::String | TokenKind::Multiline | TokenKind::Number | TokenKind::Tag => {
                let value = match token.kind {
                    TokenKind::Number => ArgValue::Number(token.lexeme.to_string()),
                    TokenKind::Tag => ArgValue::Tag(token.lexeme.to_string()),
                    _ => ArgValue::Str(token.lexeme.to_string()),
                };
                let Some(top) = self.stack.last_mut() else {
                    return Err(Fail::syntax("no open command".into(), token));
                };
                let accepted = top
                    .cmd
                    .check_next_arg(value, true, true, &self.loaded_extensions)
                    .map_err(|e| Fail::command(e, token))?;
                if !accepted {
                    return Err(Fail::syntax(
                        format!("unexpected token '{}'", token.lexeme),
                        token,
                    ));
                }
                self.check_completion(true, token)
            }
            TokenKind::LeftCBracket => self.open_block(token),
            TokenKind::Semicolon => self.finish_command(token),
            _ => Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            )),
        }
    }

    fn stringlist_token(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        match token.kind {
            TokenKind::String => {
                self.cur_stringlist.push(token.lexeme.to_string());
                self.expected = vec![TokenKind::Comma, TokenKind::RightBracket];
                Ok(())
            }
            TokenKind::Comma => {
                self.expected = vec![TokenKind::String];
                Ok(())
            }
            TokenKind::RightBracket => {
                let list = std::mem::take(&mut self.cur_stringlist);
                let Some(top) = self.stack.last_mut() else {
                    return Err(Fail::syntax("no open command".into(), token));
                };
                let accepted = top
                    .cmd
                    .check_next_arg(ArgValue::StrList(list), true, true, &self.loaded_extensions)
                    .map_err(|e| Fail::command(e, token))?;
                if !accepted {
                    return Err(Fail::syntax(
                        format!("unexpected token '{}'", token.lexeme),
                        token,
                    ));
                }
                self.cstate = CState::Arguments;
                self.check_completion(true, token)
            }
            _ => Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            )),
        }
    }

    /// Unwind the stack after an argument was bound: a complete test is
    /// popped and bound into the command below, repeatedly, until a command
    /// that is still collecting input (or awaits its block or semicolon) is
    /// on top.
    fn check_completion(&mut self, test_semicolon: bool, token: &Token<'_>) -> Result<(), Fail> {
        loop {
            let Some(top) = self.stack.last() else {
                return Ok(());
            };
            if !top.cmd.is_complete() {
                return Ok(());
            }
            match top.cmd.kind() {
                CommandKind::Action => {
                    if test_semicolon {
                        self.expected = vec![TokenKind::Semicolon];
                    }
                    return Ok(());
                }
                CommandKind::Control => {
                    if !top.cmd.spec().accept_children && test_semicolon {
                        self.expected = vec![TokenKind::Semicolon];
                    }
                    return Ok(());
                }
                CommandKind::Test => {
                    let Some(entry) = self.stack.pop() else {
                        return Ok(());
                    };
                    self.bind_test_into_parent(entry.cmd, token)?;
                    if let Some(parent) = self.stack.last() {
                        if parent.cmd.spec().variable_args_nb {
                            self.expected = vec![TokenKind::Comma, TokenKind::RightParenthesis];
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn bind_test_into_parent(&mut self, test: Command, token: &Token<'_>) -> Result<(), Fail> {
        let Some(parent) = self.stack.last_mut() else {
            return Err(Fail::syntax(
                format!("{} may not appear as a first command", test.name()),
                token,
            ));
        };
        let name = test.name().to_string();
        let accepted = parent
            .cmd
            .check_next_arg(
                ArgValue::Test(Box::new(test)),
                true,
                true,
                &self.loaded_extensions,
            )
            .map_err(|e| Fail::command(e, token))?;
        if !accepted {
            return Err(Fail::syntax(format!("unexpected test {name}"), token));
        }
        Ok(())
    }

    fn close_testlist(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        let closes_list = self
            .stack
            .last()
            .map(|e| e.cmd.spec().variable_args_nb)
            .unwrap_or(false);
        if !closes_list {
            return Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            ));
        }
        let Some(mut entry) = self.stack.pop() else {
            return Err(Fail::syntax("no open command".into(), token));
        };
        entry.cmd.close();
        self.bind_test_into_parent(entry.cmd, token)?;
        self.check_completion(false, token)
    }

    fn open_block(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        let Some(top) = self.stack.last_mut() else {
            return Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            ));
        };
        if top.cmd.kind() != CommandKind::Control
            || !top.cmd.spec().accept_children
            || !top.cmd.is_complete()
        {
            return Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            ));
        }
        top.in_block = true;
        self.cstate = CState::Command;
        Ok(())
    }

    fn close_block(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        let Some(entry) = self.stack.pop() else {
            return Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            ));
        };
        if !entry.in_block {
            return Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            ));
        }
        self.record(entry.cmd, token)?;
        self.cstate = CState::Command;
        Ok(())
    }

    fn finish_command(&mut self, token: &Token<'_>) -> Result<(), Fail> {
        let Some(top) = self.stack.last() else {
            return Err(Fail::syntax(
                format!("unexpected token '{}'", token.lexeme),
                token,
            ));
        };
        if !top.cmd.is_complete() {
            return Err(Fail::syntax(
                format!("incomplete command {}", top.cmd.name()),
                token,
            ));
        }
        let Some(entry) = self.stack.pop() else {
            return Err(Fail::syntax("no open command".into(), token));
        };
        entry.cmd.on_complete(&mut self.loaded_extensions);
        self.record(entry.cmd, token)?;
        self.cstate = CState::Command;
        Ok(())
    }

    /// Attach a finished command to its parent's block, or to the result
    /// list when it is top-level, enforcing `must_follow` against the
    /// preceding sibling.
    fn record(&mut self, mut cmd: Command, token: &Token<'_>) -> Result<(), Fail> {
        if !cmd.spec().must_follow.is_empty() {
            let prev = match self.stack.last() {
                Some(parent) => parent.cmd.children.last().map(|c| c.name().to_string()),
                None => self.result.last().map(|c| c.name().to_string()),
            };
            let allowed = prev
                .as_ref()
                .is_some_and(|name| cmd.spec().must_follow.contains(name));
            if !allowed {
                return Err(Fail::syntax(
                    format!(
                        "the {} command must follow an {} command",
                        cmd.name(),
                        cmd.spec().must_follow.join(" or ")
                    ),
                    token,
                ));
            }
        }
        match self.stack.last_mut() {
            Some(parent) => {
                parent.cmd.children.push(cmd);
            }
            None => {
                cmd.hash_comments = std::mem::take(&mut self.hash_comments);
                self.result.push(cmd);
            }
        }
        Ok(())
    }

    /// Structural dump of the parse tree.
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for cmd in &self.result {
            cmd.dump(out, 0)?;
        }
        Ok(())
    }

    /// Serialise the parse tree back to SIEVE text.
    pub fn to_sieve(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for cmd in &self.result {
            cmd.to_sieve(out, 0)?;
        }
        Ok(())
    }
}

fn join_kinds(kinds: &[TokenKind]) -> String {
    kinds
        .iter()
        .map(TokenKind::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ArgSpec, ArgType, CommandSpec, ExtraArg};

    fn parse_ok(src: &str) -> Parser {
        let mut parser = Parser::new();
        if let Err(err) = parser.parse(src) {
            panic!("parse failed: {err}");
        }
        parser
    }

    fn parse_err(src: &str) -> ParseError {
        let mut parser = Parser::new();
        parser.parse(src).expect_err("parse unexpectedly succeeded")
    }

    fn representation(parser: &Parser) -> String {
        let mut out = String::new();
        parser.dump(&mut out).unwrap();
        out
    }

    fn assert_representation(src: &str, expected: &str) {
        let parser = parse_ok(src);
        assert_eq!(representation(&parser), expected.trim_start());
    }

    fn serialised(parser: &Parser) -> String {
        let mut out = String::new();
        parser.to_sieve(&mut out).unwrap();
        out
    }

    #[test]
    fn hash_comments_are_skipped() {
        assert_representation(
            "
if size :over 100k { # this is a comment
    discard;
}
",
            "
if (type: control)
    size (type: test)
        :over
        100k
    discard (type: action)
",
        );
    }

    #[test]
    fn bracket_comments_are_skipped() {
        assert_representation(
            "
if size :over 100K { /* this is a comment
    this is still a comment */ discard /* this is a comment
    */ ;
}
",
            "
if (type: control)
    size (type: test)
        :over
        100K
    discard (type: action)
",
        );
    }

    #[test]
    fn comment_markers_inside_strings_are_data() {
        assert_representation(
            "
if header :contains \"Cc\" \"/* comment */\" {
    discard;
}
",
            "
if (type: control)
    header (type: test)
        :contains
        \"Cc\"
        \"/* comment */\"
    discard (type: action)
",
        );
    }

    #[test]
    fn multiline_strings_parse() {
        assert_representation(
            "
require \"reject\";

if allof (false, address :is [\"From\", \"Sender\"] [\"blka@bla.com\"]) {
    reject text:
noreply
============================
Your email has been canceled
============================
.
;
    stop;
} else {
    reject text:
================================
Your email has been canceled too
================================
.
;
}
",
            "
require (type: control)
    \"reject\"
if (type: control)
    allof (type: test)
        false (type: test)
        address (type: test)
            :is
            [\"From\",\"Sender\"]
            [\"blka@bla.com\"]
    reject (type: action)
        text:
noreply
============================
Your email has been canceled
============================
.
    stop (type: control)
else (type: control)
    reject (type: action)
        text:
================================
Your email has been canceled too
================================
.
",
        );
    }

    #[test]
    fn nested_blocks_parse() {
        assert_representation(
            "
if header :contains \"Sender\" \"example.com\" {
  if header :contains \"Sender\" \"me@\" {
    discard;
  } elsif header :contains \"Sender\" \"you@\" {
    keep;
  }
}
",
            "
if (type: control)
    header (type: test)
        :contains
        \"Sender\"
        \"example.com\"
    if (type: control)
        header (type: test)
            :contains
            \"Sender\"
            \"me@\"
        discard (type: action)
    elsif (type: control)
        header (type: test)
            :contains
            \"Sender\"
            \"you@\"
        keep (type: action)
",
        );
    }

    #[test]
    fn empty_blocks_are_allowed() {
        assert_representation(
            "
if true {

}
",
            "
if (type: control)
    true (type: test)
",
        );
    }

    #[test]
    fn rfc5228_extended_example_parses() {
        let parser = parse_ok(
            "
#
# Example Sieve Filter
# Declare any optional features or extension used by the script
#
require [\"fileinto\"];

#
# Handle messages from known mailing lists
# Move messages from IETF filter discussion list to filter mailbox
#
if header :is \"Sender\" \"owner-ietf-mta-filters@imc.org\"
        {
        fileinto \"filter\";  # move to \"filter\" mailbox
        }
#
# Keep all messages to or from people in my company
#
elsif address :DOMAIN :is [\"From\", \"To\"] \"example.com\"
        {
        keep;               # keep in \"In\" mailbox
        }

#
# Try and catch unsolicited email.  If a message is not to me,
# or it contains a subject known to be spam, file it away.
#
elsif anyof (NOT address :all :contains
               [\"To\", \"Cc\", \"Bcc\"] \"me@example.com\",
             header :matches \"subject\"
               [\"*make*money*fast*\", \"*university*dipl*mas*\"])
        {
        fileinto \"spam\";   # move to \"spam\" mailbox
        }
else
        {
        # Move all other (non-company) mail to \"personal\"
        # mailbox.
        fileinto \"personal\";
        }
",
        );
        assert_eq!(parser.loaded_extensions(), ["fileinto".to_string()]);
        let names: Vec<&str> = parser.result().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["require", "if", "elsif", "elsif", "else"]);
        assert_eq!(
            representation(&parser),
            "\
require (type: control)
    [\"fileinto\"]
if (type: control)
    header (type: test)
        :is
        \"Sender\"
        \"owner-ietf-mta-filters@imc.org\"
    fileinto (type: action)
        \"filter\"
elsif (type: control)
    address (type: test)
        :DOMAIN
        :is
        [\"From\",\"To\"]
        \"example.com\"
    keep (type: action)
elsif (type: control)
    anyof (type: test)
        not (type: test)
            address (type: test)
                :all
                :contains
                [\"To\",\"Cc\",\"Bcc\"]
                \"me@example.com\"
        header (type: test)
            :matches
            \"subject\"
            [\"*make*money*fast*\",\"*university*dipl*mas*\"]
    fileinto (type: action)
        \"spam\"
else (type: control)
    fileinto (type: action)
        \"personal\"
",
        );
    }

    #[test]
    fn explicit_comparator_parses() {
        assert_representation(
            "
if header :contains :comparator \"i;octet\" \"Subject\" \"MAKE MONEY FAST\" {
  discard;
}
",
            "
if (type: control)
    header (type: test)
        :comparator
        \"i;octet\"
        :contains
        \"Subject\"
        \"MAKE MONEY FAST\"
    discard (type: action)
",
        );
    }

    #[test]
    fn optional_tags_bind_in_any_order() {
        assert_representation(
            "
if address :all :is \"from\" \"tim@example.com\" {
    discard;
}
",
            "
if (type: control)
    address (type: test)
        :all
        :is
        \"from\"
        \"tim@example.com\"
    discard (type: action)
",
        );
    }

    #[test]
    fn nested_not_tests_parse() {
        assert_representation(
            "
if not not not not true {
    stop;
}
",
            "
if (type: control)
    not (type: test)
        not (type: test)
            not (type: test)
                not (type: test)
                    true (type: test)
    stop (type: control)
",
        );
    }

    #[test]
    fn single_command_script_parses() {
        assert_representation("keep;", "keep (type: action)\n");
    }

    #[test]
    fn single_test_in_testlist_parses() {
        assert_representation(
            "
if anyof (true) {
    discard;
}
",
            "
if (type: control)
    anyof (type: test)
        true (type: test)
    discard (type: action)
",
        );
    }

    #[test]
    fn testlist_without_space_parses() {
        assert_representation(
            "
if anyof(true, false) {
    discard;
}
",
            "
if (type: control)
    anyof (type: test)
        true (type: test)
        false (type: test)
    discard (type: action)
",
        );
    }

    #[test]
    fn vacation_basic_parses() {
        parse_ok(
            "
require \"vacation\";
if header :contains \"subject\" \"cyrus\" {
    vacation \"I'm out -- send mail to cyrus-bugs\";
} else {
    vacation \"I'm out -- call me at +1 304 555 0123\";
}
",
        );
    }

    #[test]
    fn vacation_handle_parses() {
        parse_ok(
            "
require \"vacation\";
if header :contains \"subject\" \"lunch\" {
    vacation :handle \"ran-away\" \"I'm out and can't meet for lunch\";
} else {
    vacation :handle \"ran-away\" \"I'm out\";
}
",
        );
    }

    #[test]
    fn vacation_with_days_and_addresses_parses() {
        parse_ok(
            "
require \"vacation\";
vacation :days 23 :addresses [\"tjs@example.edu\",
                              \"ts4z@landru.example.edu\"]
   \"I'm away until October 19.
   If it's an emergency, call 911, I guess.\" ;
",
        );
    }

    #[test]
    fn vacation_with_single_address_parses() {
        parse_ok(
            "
require \"vacation\";
vacation :days 23 :addresses \"tjs@example.edu\"
   \"I'm away until October 19.
   If it's an emergency, call 911, I guess.\" ;
",
        );
    }

    #[test]
    fn vacation_mime_multiline_parses() {
        parse_ok(
            "
require \"vacation\";
vacation :mime text:
Content-Type: multipart/alternative; boundary=foo

--foo

I'm at the beach relaxing.  Mmmm, surf...

--foo--
.
;
",
        );
    }

    #[test]
    fn vacation_seconds_needs_its_extension() {
        parse_ok(
            "require [\"vacation\", \"vacation-seconds\"];\nvacation :seconds 90 \"gone\";\n",
        );
        let err = parse_err("require \"vacation\";\nvacation :seconds 90 \"gone\";\n");
        assert_eq!(
            err.to_string(),
            "line 2: extension 'vacation-seconds' not loaded"
        );
    }

    #[test]
    fn nested_bracket_comments_are_rejected() {
        parse_err(
            "
/* this is a comment /* with a nested comment inside */
it is allowed by the RFC :p */
",
        );
    }

    #[test]
    fn block_must_be_opened() {
        parse_err(
            "
if header :is \"Sender\" \"me@example.com\"
    discard;
}
",
        );
    }

    #[test]
    fn block_must_be_closed() {
        let err = parse_err(
            "
if header :is \"Sender\" \"me@example.com\" {
    discard;

",
        );
        assert!(err.to_string().contains("right_cbracket expected"));
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        parse_err(
            "
if header :is \"Sender\" \"Toto\" & header :contains \"Cc\" \"Tata\" {

}
",
        );
    }

    #[test]
    fn empty_string_lists_are_rejected() {
        parse_err("require [];");
    }

    #[test]
    fn unclosed_string_lists_are_rejected() {
        parse_err("require [\"toto\", \"tata\";");
    }

    #[test]
    fn trailing_comma_in_string_list_is_rejected() {
        parse_err("require [\"toto\",];");
    }

    #[test]
    fn testlist_needs_opening_parenthesis() {
        let err = parse_err(
            "
if anyof header :is \"Sender\" \"me@example.com\",
          header :is \"Sender\" \"myself@example.com\") {
    fileinto \"trash\";
}
",
        );
        assert!(err.to_string().contains("left_parenthesis expected"));
    }

    #[test]
    fn testlist_needs_closing_parenthesis() {
        parse_err(
            "
if anyof (header :is \"Sender\" \"me@example.com\",
          header :is \"Sender\" \"myself@example.com\" {
    fileinto \"trash\";
}
",
        );
    }

    #[test]
    fn incomplete_test_in_testlist_is_rejected() {
        parse_err(
            "
if anyof (header :is \"Sender\" {
    fileinto \"trash\";
}
",
        );
    }

    #[test]
    fn trailing_comma_in_testlist_is_rejected() {
        parse_err(
            "
if anyof (header :is \"Sender\" \"me@example.com\",) {

}
",
        );
    }

    #[test]
    fn comma_between_arguments_is_rejected() {
        parse_err("require \"fileinto\", \"enveloppe\";");
    }

    #[test]
    fn tags_cannot_follow_required_arguments() {
        parse_err(
            "
if address \"From\" :is \"tim@example.com\" {
    discard;
}
",
        );
    }

    #[test]
    fn surplus_arguments_are_rejected() {
        parse_err(
            "
if address :is \"From\" \"tim@example.com\" \"tutu\" {
    discard;
}
",
        );
    }

    #[test]
    fn not_needs_a_test() {
        parse_err(
            "
if not {
    discard;
}
",
        );
    }

    #[test]
    fn missing_semicolon_is_rejected() {
        let err = parse_err("require [\"fileinto\"]\n");
        assert!(err.to_string().contains("semicolon expected"));
    }

    #[test]
    fn missing_semicolon_in_block_is_rejected() {
        parse_err(
            "
if true {
    stop
}
",
        );
    }

    #[test]
    fn parenthesised_single_test_is_rejected() {
        parse_err(
            "
if (true) {

}
",
        );
    }

    #[test]
    fn unknown_commands_are_rejected() {
        let err = parse_err("macommande \"Toto\";");
        assert_eq!(err.to_string(), "line 1: unknown command macommande");
    }

    #[test]
    fn elsif_needs_a_preceding_if() {
        let err = parse_err("elsif true {\n\n}\n");
        assert_eq!(
            err.to_string(),
            "line 3: the elsif command must follow an if or elsif command"
        );
        parse_err("elsif header :is \"From\" \"toto\" {\n\n}\n");
    }

    #[test]
    fn nested_elsif_needs_a_preceding_sibling() {
        parse_err(
            "
if true {
  elsif false {

  }
}
",
        );
    }

    #[test]
    fn argument_on_argumentless_command_is_rejected() {
        parse_err("stop \"toto\";");
    }

    #[test]
    fn unknown_match_type_is_rejected() {
        parse_err(
            "
if header :isnot \"Sent\" \"me@example.com\" {
  stop;
}
",
        );
        parse_err(
            "
if header :isnot \"Sent\" 10000 {
  stop;
}
",
        );
    }

    #[test]
    fn unknown_comparator_value_is_rejected() {
        let err = parse_err(
            "
if header :contains :comparator \"i;prout\" \"Subject\" \"MAKE MONEY FAST\" {
  discard;
}
",
        );
        assert!(err.to_string().contains("bad value"));
    }

    #[test]
    fn extension_command_without_require_is_rejected() {
        let err = parse_err(
            "
if header :contains \"Subject\" \"MAKE MONEY FAST\" {
  fileinto \"spam\";
}
",
        );
        assert!(err.to_string().contains("fileinto"));
    }

    #[test]
    fn tests_cannot_appear_at_top_level() {
        let err = parse_err("true;");
        assert_eq!(
            err.to_string(),
            "line 1: true may not appear as a first command"
        );
    }

    #[test]
    fn currentdate_with_relational_parses() {
        parse_ok(
            "require [\"date\", \"relational\"];

if allof ( currentdate :value \"ge\" \"date\" \"2013-10-23\" , currentdate :value \"le\" \"date\" \"2014-10-12\" ) 
{
    discard;
}
",
        );
    }

    #[test]
    fn currentdate_with_zone_parses() {
        parse_ok(
            "require [\"date\", \"relational\"];

if allof ( currentdate :zone \"+0100\" :value \"ge\" \"date\" \"2013-10-23\" , currentdate :value \"le\" \"date\" \"2014-10-12\" ) 
{
    discard;
}
",
        );
    }

    #[test]
    fn currentdate_without_relational_parses() {
        parse_ok(
            "require [\"date\"];

if allof ( 
  currentdate :zone \"+0100\" :is \"date\" \"2013-10-23\"  
) 
{
    discard;
}",
        );
    }

    #[test]
    fn currentdate_value_needs_relational() {
        let err = parse_err(
            "require [\"date\"];
if allof (currentdate :value \"ge\" \"date\" \"2013-10-23\") {
    discard;
}
",
        );
        assert_eq!(err.to_string(), "line 2: extension 'relational' not loaded");
    }

    #[test]
    fn set_command_parses() {
        parse_ok(
            "require [\"variables\"];

set \"matchsub\" \"testsubject\";
        
if allof (
  header :contains [\"Subject\"] \"${header}\"
)
{
  discard;
}
",
        );
    }

    #[test]
    fn redirect_copy_needs_the_copy_extension() {
        parse_err(
            "
if header :contains \"subject\" \"test\" {
    redirect :copy \"dev@null.com\";
}
",
        );
        parse_ok(
            "require \"copy\";
if header :contains \"subject\" \"test\" {
    redirect :copy \"dev@null.com\";
}
",
        );
    }

    #[test]
    fn fileinto_copy_needs_the_copy_extension() {
        let err = parse_err(
            "require \"fileinto\";
if header :contains \"subject\" \"test\" {
    fileinto :copy \"Spam\";
}
",
        );
        assert_eq!(err.to_string(), "line 3: extension 'copy' not loaded");

        parse_ok(
            "require [\"fileinto\", \"copy\"];
if header :contains \"subject\" \"test\" {
    fileinto :copy \"Spam\";
}
",
        );
    }

    #[test]
    fn hasflag_resolves_lone_flag_list() {
        let parser = parse_ok(
            "require [\"imap4flags\"];\nif hasflag \"\\\\Flagged\" { discard; }\n",
        );
        let hasflag = parser.result()[1]
            .walk()
            .find(|c| c.name() == "hasflag")
            .expect("hasflag node");
        assert!(hasflag.arguments.contains_key("list-of-flags"));
        assert!(!hasflag.arguments.contains_key("variable-list"));
    }

    #[test]
    fn hasflag_resolves_inside_testlists() {
        let parser = parse_ok(
            "require [\"imap4flags\"];\nif anyof (hasflag \"A\", hasflag [\"B\", \"C\"]) { keep; }\n",
        );
        let flags: Vec<bool> = parser.result()[1]
            .walk()
            .filter(|c| c.name() == "hasflag")
            .map(|c| c.arguments.contains_key("list-of-flags"))
            .collect();
        assert_eq!(flags, vec![true, true]);
    }

    #[test]
    fn hasflag_with_variable_list_keeps_both() {
        let parser = parse_ok(
            "require [\"imap4flags\"];\nif hasflag \"myvar\" \"\\\\Seen\" { keep; }\n",
        );
        let hasflag = parser.result()[1]
            .walk()
            .find(|c| c.name() == "hasflag")
            .expect("hasflag node");
        assert!(hasflag.arguments.contains_key("variable-list"));
        assert!(hasflag.arguments.contains_key("list-of-flags"));
    }

    #[test]
    fn required_slots_are_bound_in_every_result() {
        let parser = parse_ok(
            "require [\"fileinto\"];\nif anyof (exists [\"X-List\"], size :under 2M) { fileinto \"lists\"; } else { keep; }\n",
        );
        for top in parser.result() {
            for cmd in top.walk() {
                for slot in &cmd.spec().args {
                    if slot.required {
                        assert!(
                            cmd.arguments.contains_key(&slot.name),
                            "slot {} of {} unbound",
                            slot.name,
                            cmd.name()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn incomplete_command_at_semicolon_is_rejected() {
        let err = parse_err("require \"fileinto\";\nif true { fileinto; }\n");
        assert_eq!(err.to_string(), "line 2: incomplete command fileinto");
    }

    #[test]
    fn hash_comments_attach_to_the_next_command() {
        let parser = parse_ok(
            "# Filter: spam\n# Description: catches spam\nif true { discard; }\n",
        );
        assert_eq!(
            parser.result()[0].hash_comments,
            vec![
                "# Filter: spam".to_string(),
                "# Description: catches spam".to_string()
            ]
        );
    }

    #[test]
    fn parse_resets_previous_state() {
        let mut parser = Parser::new();
        parser.parse("require \"fileinto\";\n").unwrap();
        assert_eq!(parser.loaded_extensions(), ["fileinto".to_string()]);
        parser.parse("keep;").unwrap();
        assert!(parser.loaded_extensions().is_empty());
        assert_eq!(parser.result().len(), 1);
    }

    #[test]
    fn failed_parse_clears_the_result() {
        let mut parser = Parser::new();
        parser.parse("keep;").unwrap();
        assert!(parser.parse("keep").is_err());
        assert!(parser.result().is_empty());
    }

    #[test]
    fn parse_serialise_parse_is_stable() {
        let src = "
require [\"fileinto\", \"reject\"];

if header :is \"Sender\" \"owner-ietf-mta-filters@imc.org\" {
    fileinto \"filter\";
} elsif address :DOMAIN :is [\"From\", \"To\"] \"example.com\" {
    keep;
} elsif anyof (not address :all :contains [\"To\", \"Cc\"] \"me@example.com\",
               header :matches \"subject\" [\"*money*\", \"*fast*\"]) {
    fileinto \"spam\";
} else {
    reject \"no thanks\";
}
";
        let first_parse = parse_ok(src);
        let once = serialised(&first_parse);
        let second_parse = parse_ok(&once);
        assert_eq!(representation(&first_parse), representation(&second_parse));
        assert_eq!(once, serialised(&second_parse));
    }

    #[test]
    fn multiline_round_trips() {
        let src = "require \"reject\";\nreject text:\nGo away\n.\n;\n";
        let first_parse = parse_ok(src);
        let once = serialised(&first_parse);
        let second_parse = parse_ok(&once);
        assert_eq!(representation(&first_parse), representation(&second_parse));
    }

    #[test]
    fn registered_commands_parse() {
        let mut parser = Parser::new();
        parser.registry_mut().register(
            CommandSpec::new("mytest", crate::command::CommandKind::Action)
                .arg(
                    ArgSpec::new("testtag", &[ArgType::Tag])
                        .values(&[":testtag"])
                        .extra(ExtraArg::new(&[ArgType::Number])),
                )
                .arg(
                    ArgSpec::new("recipients", &[ArgType::String, ArgType::StringList])
                        .required(),
                ),
        );
        parser
            .parse("mytest :testtag 10 [\"testrecp1@example.com\"];\n")
            .unwrap();
        assert_eq!(parser.result()[0].name(), "mytest");
    }

    #[test]
    fn size_test_structure_matches() {
        assert_representation(
            "if size :over 100k { discard; }",
            "
if (type: control)
    size (type: test)
        :over
        100k
    discard (type: action)
",
        );
    }

    #[test]
    fn error_positions_point_at_the_offending_token() {
        let err = parse_err("require \"fileinto\";\nif true { fileinto :copy \"x\"; }\n");
        let (line, col, len) = err.position();
        assert_eq!(line, 2);
        assert_eq!(col, 20);
        assert_eq!(len, ":copy".len());
    }
}
