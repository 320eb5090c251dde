//! Administrative statements.
//!
//! Supported forms (keywords are case-insensitive, `<tenant>` is a name or `[id]`):
//!
//! ```text
//! CREATE TENANT [IF NOT EXISTS] <name> [SERVICE MODE <mode>]
//! DROP TENANT [IF EXISTS] <tenant>
//! ALTER TENANT <tenant> GRANT CAPABILITY <kind>[=<value>] [, ...]
//! ALTER TENANT <tenant> GRANT ALL CAPABILITIES
//! ALTER TENANT <tenant> REVOKE CAPABILITY <kind> [, ...]
//! ALTER TENANT <tenant> REVOKE ALL CAPABILITIES
//! ```
//!
//! A boolean capability granted without a value is granted `true`. Each
//! capability statement produces exactly one new authoritative version.

use crate::control::api::{ServiceMode, TenantRecord};
use crate::control::capabilities::{
    CapabilityAuthority, CapabilityChange, CapabilityKind, CapabilityValue,
};
use crate::control::tenants::{TenantDirectory, TenantRef};
use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;

/// A parsed administrative statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Provision a tenant.
    CreateTenant {
        name: String,
        if_not_exists: bool,
        service_mode: ServiceMode,
    },
    /// Drop a tenant.
    DropTenant { tenant: TenantRef, if_exists: bool },
    /// Grant capability values.
    GrantCapabilities {
        tenant: TenantRef,
        grants: Vec<(CapabilityKind, CapabilityValue)>,
    },
    /// Revoke capabilities back to their defaults.
    RevokeCapabilities {
        tenant: TenantRef,
        kinds: Vec<CapabilityKind>,
    },
}

impl Statement {
    /// Parse one statement. A trailing `;` is allowed.
    pub fn parse(input: &str) -> PlaneResult<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let statement = parser.statement()?;
        parser.finish()?;
        Ok(statement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Comma,
    Equals,
}

fn tokenize(input: &str) -> PlaneResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.trim().trim_end_matches(';').chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => text.push(ch),
                        None => return Err(PlaneError::invalid_statement("unterminated string")),
                    }
                }
                tokens.push(Token::Quoted(text));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == ',' || ch == '=' || ch == '\'' {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> PlaneResult<()> {
        if self.accept_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", keyword)))
        }
    }

    fn word(&mut self, what: &str) -> PlaneResult<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            Some(Token::Quoted(q)) => Ok(q),
            _ => {
                self.pos -= 1;
                Err(self.unexpected(&format!("expected {}", what)))
            }
        }
    }

    fn unexpected(&self, message: &str) -> PlaneError {
        let near = match self.peek() {
            Some(Token::Word(w)) => w.clone(),
            Some(Token::Quoted(q)) => format!("'{}'", q),
            Some(Token::Comma) => ",".to_string(),
            Some(Token::Equals) => "=".to_string(),
            None => "end of input".to_string(),
        };
        PlaneError::invalid_statement(format!("{} near {}", message, near))
    }

    fn finish(&self) -> PlaneResult<()> {
        if self.pos < self.tokens.len() {
            Err(self.unexpected("unexpected trailing input"))
        } else {
            Ok(())
        }
    }

    fn statement(&mut self) -> PlaneResult<Statement> {
        if self.accept_keyword("CREATE") {
            self.create_tenant()
        } else if self.accept_keyword("DROP") {
            self.drop_tenant()
        } else if self.accept_keyword("ALTER") {
            self.alter_tenant()
        } else {
            Err(self.unexpected("expected CREATE, DROP or ALTER"))
        }
    }

    fn create_tenant(&mut self) -> PlaneResult<Statement> {
        self.expect_keyword("TENANT")?;
        let if_not_exists = if self.accept_keyword("IF") {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
            true
        } else {
            false
        };
        let name = self.word("tenant name")?;
        let service_mode = if self.accept_keyword("SERVICE") {
            self.expect_keyword("MODE")?;
            let mode = self.word("service mode")?;
            ServiceMode::parse(&mode).ok_or_else(|| {
                PlaneError::invalid_statement(format!("unknown service mode {:?}", mode))
            })?
        } else {
            ServiceMode::default()
        };
        Ok(Statement::CreateTenant {
            name,
            if_not_exists,
            service_mode,
        })
    }

    fn drop_tenant(&mut self) -> PlaneResult<Statement> {
        self.expect_keyword("TENANT")?;
        let if_exists = if self.accept_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            true
        } else {
            false
        };
        let tenant = TenantRef::parse(&self.word("tenant")?)?;
        Ok(Statement::DropTenant { tenant, if_exists })
    }

    fn alter_tenant(&mut self) -> PlaneResult<Statement> {
        self.expect_keyword("TENANT")?;
        let tenant = TenantRef::parse(&self.word("tenant")?)?;
        if self.accept_keyword("GRANT") {
            if self.all_capabilities()? {
                let grants = CapabilityKind::ALL
                    .into_iter()
                    .filter(CapabilityKind::is_boolean)
                    .map(|kind| (kind, CapabilityValue::Bool(true)))
                    .collect();
                return Ok(Statement::GrantCapabilities { tenant, grants });
            }
            let mut grants = Vec::new();
            loop {
                let kind = CapabilityKind::parse(&self.word("capability")?)?;
                let value = if matches!(self.peek(), Some(Token::Equals)) {
                    self.pos += 1;
                    kind.parse_value(&self.word("capability value")?)?
                } else if kind.is_boolean() {
                    CapabilityValue::Bool(true)
                } else {
                    return Err(PlaneError::invalid_statement(format!(
                        "capability {} requires a value",
                        kind
                    )));
                };
                grants.push((kind, value));
                if !self.accept_comma() {
                    break;
                }
            }
            Ok(Statement::GrantCapabilities { tenant, grants })
        } else if self.accept_keyword("REVOKE") {
            if self.all_capabilities()? {
                return Ok(Statement::RevokeCapabilities {
                    tenant,
                    kinds: CapabilityKind::ALL.to_vec(),
                });
            }
            let mut kinds = Vec::new();
            loop {
                kinds.push(CapabilityKind::parse(&self.word("capability")?)?);
                if !self.accept_comma() {
                    break;
                }
            }
            Ok(Statement::RevokeCapabilities { tenant, kinds })
        } else {
            Err(self.unexpected("expected GRANT or REVOKE"))
        }
    }

    /// Consume `CAPABILITY` or `ALL CAPABILITIES`; true for the latter.
    fn all_capabilities(&mut self) -> PlaneResult<bool> {
        if self.accept_keyword("ALL") {
            self.expect_keyword("CAPABILITIES")?;
            Ok(true)
        } else {
            self.expect_keyword("CAPABILITY")?;
            Ok(false)
        }
    }

    fn accept_comma(&mut self) -> bool {
        if matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

/// Result of executing a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementResult {
    /// A tenant was created.
    TenantCreated(TenantRecord),
    /// A tenant was dropped.
    TenantDropped(TenantRecord),
    /// Capabilities changed; `version` is the new authoritative version.
    CapabilitiesChanged { tenant_id: TenantId, version: u64 },
    /// Nothing to do (`IF [NOT] EXISTS`).
    NoOp,
}

impl std::fmt::Display for StatementResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TenantCreated(t) => write!(f, "CREATE TENANT {} (id {})", t.name, t.id),
            Self::TenantDropped(t) => write!(f, "DROP TENANT {} (id {})", t.name, t.id),
            Self::CapabilitiesChanged { tenant_id, version } => {
                write!(f, "ALTER TENANT [{}] (capability version {})", tenant_id, version)
            }
            Self::NoOp => write!(f, "no-op"),
        }
    }
}

/// Executes administrative statements against the metadata store.
#[derive(Debug, Clone)]
pub struct AdminExecutor {
    directory: TenantDirectory,
    authority: CapabilityAuthority,
}

impl AdminExecutor {
    /// Create an executor.
    pub fn new(directory: TenantDirectory, authority: CapabilityAuthority) -> Self {
        Self {
            directory,
            authority,
        }
    }

    /// Parse and execute a statement.
    pub fn execute_str(&self, input: &str) -> PlaneResult<StatementResult> {
        self.execute(&Statement::parse(input)?)
    }

    /// Execute a parsed statement.
    pub fn execute(&self, statement: &Statement) -> PlaneResult<StatementResult> {
        match statement {
            Statement::CreateTenant {
                name,
                if_not_exists,
                service_mode,
            } => match self.directory.create(name, None, *service_mode) {
                Ok(record) => Ok(StatementResult::TenantCreated(record)),
                Err(PlaneError::TenantExists { .. }) if *if_not_exists => Ok(StatementResult::NoOp),
                Err(e) => Err(e),
            },
            Statement::DropTenant { tenant, if_exists } => match self.directory.drop_tenant(tenant) {
                Ok(record) => Ok(StatementResult::TenantDropped(record)),
                Err(PlaneError::TenantNotFound { .. }) if *if_exists => Ok(StatementResult::NoOp),
                Err(e) => Err(e),
            },
            Statement::GrantCapabilities { tenant, grants } => {
                let changes: Vec<_> = grants
                    .iter()
                    .map(|(kind, value)| CapabilityChange::grant(*kind, value.clone()))
                    .collect();
                self.apply(tenant, &changes)
            }
            Statement::RevokeCapabilities { tenant, kinds } => {
                let changes: Vec<_> = kinds.iter().map(|k| CapabilityChange::revoke(*k)).collect();
                self.apply(tenant, &changes)
            }
        }
    }

    fn apply(&self, tenant: &TenantRef, changes: &[CapabilityChange]) -> PlaneResult<StatementResult> {
        let record = self.directory.resolve(tenant)?;
        let version = self.authority.apply(record.id, changes)?;
        Ok(StatementResult::CapabilitiesChanged {
            tenant_id: record.id,
            version,
        })
    }
}
