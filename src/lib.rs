//! SIEVE (RFC 5228) filter toolkit and MANAGESIEVE (RFC 5804) client.
//!
//! Three cooperating subsystems:
//!
//! - the grammar engine ([`lexer`], [`command`], [`parser`]): tokenises
//!   SIEVE source, validates it against a declarative command catalogue
//!   with per-extension gating, and builds a command tree that serialises
//!   back to SIEVE text;
//! - the filter factory ([`filters`]): builds, edits, reorders and
//!   introspects named filters on top of the command model, maintaining
//!   the `require` list automatically;
//! - the MANAGESIEVE client ([`client`], [`sasl`]): an async TCP client
//!   with STARTTLS, SASL authentication and the RFC 5804 script
//!   management verbs.

pub mod client;
pub mod command;
pub mod filters;
pub mod lexer;
pub mod parser;
pub mod sasl;

pub use client::{Capabilities, Client, DEFAULT_PORT, ManageSieveError};
pub use command::{
    ArgSpec, ArgType, ArgValue, Command, CommandError, CommandKind, CommandSpec, ExtraArg,
    Registry,
};
pub use filters::{FactoryError, Filter, FilterArg, FilterSet, MatchKind, MoveDirection};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{ParseError, Parser};
