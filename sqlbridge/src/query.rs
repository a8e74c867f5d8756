///
/// Query pipeline.
///
/// A `Query` is literal SQL fragments interleaved with arguments. Planning
/// turns it into engine SQL text plus a `Bindings` queue:
/// - a value becomes a `?` placeholder, unless the fragment after it starts
///   with a parameter name (`:name`, `@name`, `?name`), in which case the
///   value is queued under that name and the fragment supplies the
///   placeholder itself
/// - a parameter map adds no text and serves named placeholders
/// - a command adds no text and runs between statements
///
/// Execution prepares one statement at a time from the remaining text,
/// binds it, steps it to exhaustion and finalizes it before preparing the
/// next. Commands at the front of the queue run before each prepare.
///

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use crate::arena::{self, ArenaBuf};
use crate::bindings::Bindings;
use crate::conn::Conn;
use crate::error::Result;
use crate::row::Row;
use crate::statement::{self, Statement};
use crate::value::Value;

/// An out-of-band action embedded in a query, run against the query's
/// connection when it reaches the front of the argument queue.
#[async_trait]
pub trait SqlCommand: Send + Sync {
    async fn execute(&self, conn: &mut Conn) -> Result<()>;
}

pub enum Arg {
    Value(Value),
    Params(IndexMap<String, Value>),
    Command(Box<dyn SqlCommand>),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Params(p) => f.debug_tuple("Params").field(p).finish(),
            Arg::Command(_) => f.write_str("Command"),
        }
    }
}

/// SQL fragments interleaved with arguments. There is always one more
/// fragment than there are arguments.
#[derive(Debug)]
pub struct Query {
    fragments: Vec<String>,
    args: Vec<Arg>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            fragments: vec![sql.into()],
            args: Vec::new(),
        }
    }

    /// Appends literal SQL.
    pub fn sql(mut self, text: &str) -> Self {
        if let Some(last) = self.fragments.last_mut() {
            last.push_str(text);
        }
        self
    }

    /// Appends an argument value.
    pub fn bind(self, value: impl Into<Value>) -> Self {
        self.arg(Arg::Value(value.into()))
    }

    /// Appends a map of named values.
    pub fn params<K, V>(self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.arg(Arg::Params(params))
    }

    /// Appends a command.
    pub fn command(self, command: impl SqlCommand + 'static) -> Self {
        self.arg(Arg::Command(Box::new(command)))
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self.fragments.push(String::new());
        self
    }

    pub fn plan(self) -> QueryPlan {
        let mut fragments = self.fragments.into_iter();
        let mut sql = fragments.next().unwrap_or_default();
        let mut bindings = Bindings::new();

        for (arg, next) in self.args.into_iter().zip(fragments) {
            match arg {
                Arg::Value(value) => match leading_parameter_name(&next) {
                    Some(name) => bindings.push_named(name, value),
                    None => {
                        bindings.push_anon(value);
                        sql.push('?');
                    }
                },
                Arg::Params(params) => bindings.push_params(params),
                Arg::Command(command) => bindings.push_command(command),
            }
            sql.push_str(&next);
        }
        QueryPlan { sql, bindings }
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::new(sql)
    }
}

/// The parameter name `fragment` starts with, sigil included.
fn leading_parameter_name(fragment: &str) -> Option<&str> {
    let mut chars = fragment.char_indices();
    match chars.next() {
        Some((_, '?' | ':' | '@')) => {}
        _ => return None,
    }
    let end = chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(fragment.len());
    (end > 1).then(|| &fragment[..end])
}

/// Engine SQL text and the arguments its statements will claim.
#[derive(Debug)]
pub struct QueryPlan {
    sql: String,
    bindings: Bindings,
}

impl QueryPlan {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
}

/// Lazy sequence of the bound statements of a query. Each call to `next`
/// finalizes the previous statement.
pub struct Statements<'c> {
    conn: &'c mut Conn,
    sql: String,
    bindings: Bindings,
    text: Option<Arc<ArenaBuf>>,
    offset: usize,
    current: Option<Statement>,
    finished: bool,
}

impl<'c> Statements<'c> {
    pub(crate) fn new(conn: &'c mut Conn, plan: QueryPlan) -> Self {
        Self {
            conn,
            sql: plan.sql,
            bindings: plan.bindings,
            text: None,
            offset: 0,
            current: None,
            finished: false,
        }
    }

    /// The next statement, prepared and bound. `None` once the text is
    /// exhausted.
    pub async fn next(&mut self) -> Result<Option<&mut Statement>> {
        if self.finished {
            return Ok(None);
        }
        match self.advance().await {
            Ok(true) => Ok(self.current.as_mut()),
            Ok(false) => {
                self.finished = true;
                Ok(None)
            }
            Err(err) => {
                self.finish().await;
                Err(err)
            }
        }
    }

    pub(crate) fn current(&mut self) -> Option<&mut Statement> {
        self.current.as_mut()
    }

    /// Stops the sequence, finalizing the current statement.
    pub(crate) async fn finish(&mut self) {
        self.finished = true;
        if let Some(mut stmt) = self.current.take() {
            let _ = stmt.finalize().await;
        }
    }

    async fn advance(&mut self) -> Result<bool> {
        if let Some(mut stmt) = self.current.take() {
            stmt.finalize().await?;
        }

        loop {
            self.run_commands().await?;

            let remaining = self.sql.len() - self.offset;
            if remaining < 2 {
                break;
            }
            let db = self.conn.ensure_open().await?;
            let text = match &self.text {
                Some(text) => Arc::clone(text),
                None => {
                    let text = Arc::new(arena::encode_cstring(&self.sql)?);
                    self.text = Some(Arc::clone(&text));
                    text
                }
            };

            let offset = self.offset;
            let engine = self.conn.engine();
            let prepared = engine
                .call(move || unsafe {
                    statement::prepare(db, text.as_c_ptr().add(offset), remaining)
                })
                .await??;
            if prepared.consumed == 0 && prepared.stmt.is_none() {
                break;
            }
            self.offset += prepared.consumed;

            if let Some(mut stmt) = Statement::new(engine, db, prepared) {
                stmt.clear().await?;
                stmt.bind_all(&mut self.bindings).await?;
                self.current = Some(stmt);
                return Ok(true);
            }
        }

        for command in self.bindings.drain_commands() {
            command.execute(self.conn).await?;
        }
        Ok(false)
    }

    async fn run_commands(&mut self) -> Result<()> {
        while let Some(command) = self.bindings.next_command() {
            debug!("running query command");
            command.execute(self.conn).await?;
        }
        Ok(())
    }
}

/// Rows of every statement of a query, in order.
pub struct QueryRows<'c> {
    stmts: Statements<'c>,
    stepping: bool,
}

impl<'c> QueryRows<'c> {
    pub(crate) fn new(stmts: Statements<'c>) -> Self {
        Self {
            stmts,
            stepping: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.stepping {
                if let Some(stmt) = self.stmts.current() {
                    match stmt.step().await {
                        Ok(Some(row)) => return Ok(Some(row)),
                        Ok(None) => {}
                        Err(err) => {
                            self.stepping = false;
                            self.stmts.finish().await;
                            return Err(err);
                        }
                    }
                }
                self.stepping = false;
            }
            if self.stmts.next().await?.is_none() {
                return Ok(None);
            }
            self.stepping = true;
        }
    }

    /// Runs the whole query, returning the last row it produced.
    pub async fn exec(mut self) -> Result<Option<Row>> {
        let mut last = None;
        while let Some(row) = self.next().await? {
            last = Some(row);
        }
        Ok(last)
    }

    pub async fn all(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}
