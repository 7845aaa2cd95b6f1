use crate::cache::CacheMode;
use crate::connection::PgConnection;
use crate::error::Error;
use crate::io::Decode;
use crate::message::{
    Bind, CommandComplete, CopyFail, DataRow, Describe, Execute, MessageFormat,
    ParameterDescription, Parse, Query, RowDescription, Sync,
};
use crate::statement::{FieldDescription, StatementDescription};
use crate::types::{Oid, PgFormat};

/// The raw inputs to one extended-query execution.
///
/// Values are already in their wire encoding (text or binary per
/// `param_formats`); `None` is the SQL NULL. Encoding typed Rust values
/// into these buffers is the job of a layer above this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgParams<'a> {
    /// Declared parameter types for `Parse`; empty leaves every type to
    /// server inference.
    pub param_oids: &'a [Oid],

    /// Format codes for `params`: empty means all-text, one applies to
    /// all, otherwise one per parameter.
    pub param_formats: &'a [PgFormat],

    /// The parameter values.
    pub params: &'a [Option<&'a [u8]>],

    /// Requested format codes for result columns, with the same
    /// empty/one/exact convention.
    pub result_formats: &'a [PgFormat],
}

impl<'a> PgParams<'a> {
    /// Text-format parameters with everything else left to defaults.
    pub fn text(params: &'a [Option<&'a [u8]>]) -> Self {
        PgParams {
            params,
            ..PgParams::default()
        }
    }
}

/// One row of a result set; values are raw wire bytes borrowed via
/// [`get`].
///
/// [`get`]: Self::get
#[derive(Debug)]
pub struct PgRow {
    data: DataRow,
}

impl PgRow {
    /// The value of column `index`; `None` is the SQL NULL.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.data.get(index)
    }

    /// The value of column `index` as text, if it is valid UTF-8.
    pub fn get_str(&self, index: usize) -> Option<&str> {
        std::str::from_utf8(self.get(index)?).ok()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The fully drained outcome of executing one statement.
#[derive(Debug, Default)]
pub struct PgQueryResult {
    /// The command tag (`SELECT 1`, `INSERT 0 2`, ...).
    pub command_tag: String,

    /// Rows affected, parsed from the tag; zero for tags without a count.
    pub rows_affected: u64,

    /// The shape of `rows`; empty when the statement returns no rows.
    pub fields: Vec<FieldDescription>,

    pub rows: Vec<PgRow>,
}

// One extended-query exchange walks these states in order; an error
// response short-circuits to AwaitingReadyForQuery, since Sync always
// produces the terminator no matter where the sequence failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ExtendedStep {
    AwaitingParseComplete,
    AwaitingBindComplete,
    AwaitingRowDescription,
    StreamingRows,
    AwaitingReadyForQuery,
    Done,
}

/// Streams the rows of one extended-query execution.
///
/// Dropping the reader mid-stream is allowed: the connection discards the
/// rest of the exchange before its next operation starts. A server error
/// surfaces from [`fetch`] *after* the protocol has resynchronized, so the
/// connection remains usable.
///
/// [`fetch`]: Self::fetch
pub struct PgResultReader<'c> {
    conn: &'c mut PgConnection,
    step: ExtendedStep,
    fields: Vec<FieldDescription>,
    command_tag: String,
    rows_affected: u64,
}

impl<'c> PgResultReader<'c> {
    /// The row shape, known once the first [`fetch`] has progressed past
    /// the describe step.
    ///
    /// [`fetch`]: Self::fetch
    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// The command tag; complete only after `fetch` has returned `None`.
    pub fn command_tag(&self) -> &str {
        &self.command_tag
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// The next row, or `None` once the statement has completed and the
    /// terminating `ReadyForQuery` has been consumed.
    pub async fn fetch(&mut self) -> Result<Option<PgRow>, Error> {
        loop {
            if self.step == ExtendedStep::Done {
                return Ok(None);
            }

            let message = match self.conn.stream.recv().await {
                Ok(message) => message,

                Err(err @ Error::Database(_)) => {
                    // the server skips the rest of the sequence; eat
                    // everything up to the ReadyForQuery that answers our
                    // Sync, then report
                    self.conn.resync_to_ready().await?;
                    self.step = ExtendedStep::Done;

                    return Err(err);
                }

                Err(err) => return Err(self.conn.fuse(err)),
            };

            match (self.step, message.format) {
                (ExtendedStep::AwaitingParseComplete, MessageFormat::ParseComplete) => {
                    self.step = ExtendedStep::AwaitingBindComplete;
                }

                (ExtendedStep::AwaitingBindComplete, MessageFormat::BindComplete) => {
                    self.step = ExtendedStep::AwaitingRowDescription;
                }

                (ExtendedStep::AwaitingRowDescription, MessageFormat::RowDescription) => {
                    self.fields = RowDescription::decode(message.contents)?.fields;
                    self.step = ExtendedStep::StreamingRows;
                }

                (ExtendedStep::AwaitingRowDescription, MessageFormat::NoData) => {
                    self.step = ExtendedStep::StreamingRows;
                }

                (ExtendedStep::StreamingRows, MessageFormat::DataRow) => {
                    return Ok(Some(PgRow {
                        data: DataRow::decode(message.contents)?,
                    }));
                }

                (ExtendedStep::StreamingRows, MessageFormat::CommandComplete) => {
                    let complete = CommandComplete::decode(message.contents)?;

                    self.rows_affected = complete.rows_affected();
                    self.command_tag = complete.tag().to_owned();
                    self.step = ExtendedStep::AwaitingReadyForQuery;
                }

                (ExtendedStep::StreamingRows, MessageFormat::EmptyQueryResponse) => {
                    self.step = ExtendedStep::AwaitingReadyForQuery;
                }

                (ExtendedStep::StreamingRows, MessageFormat::PortalSuspended) => {
                    // the row limit was reached; we never re-execute a
                    // suspended portal, so the exchange ends here
                    self.step = ExtendedStep::AwaitingReadyForQuery;
                }

                (ExtendedStep::AwaitingReadyForQuery, MessageFormat::ReadyForQuery) => {
                    self.conn.handle_ready_for_query(message.contents)?;
                    self.step = ExtendedStep::Done;

                    return Ok(None);
                }

                (step, format) => {
                    return Err(self.conn.fuse(err_protocol!(
                        "unexpected message {format:?} while {step:?}"
                    )));
                }
            }
        }
    }

    /// Drain the exchange into a [`PgQueryResult`].
    pub async fn read_all(mut self) -> Result<PgQueryResult, Error> {
        let mut rows = Vec::new();

        while let Some(row) = self.fetch().await? {
            rows.push(row);
        }

        Ok(PgQueryResult {
            command_tag: self.command_tag,
            rows_affected: self.rows_affected,
            fields: self.fields,
            rows,
        })
    }
}

/// Streams the per-statement results of a simple-protocol query, which may
/// contain several statements.
///
/// Results and errors are reported strictly in statement order; after a
/// statement fails, the server skips the remainder and the stream ends.
/// Dropping the value early is allowed; the connection drains the
/// remainder before its next operation.
pub struct PgMultiResult<'c> {
    conn: &'c mut PgConnection,
    done: bool,
}

impl std::fmt::Debug for PgMultiResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMultiResult")
            .field("done", &self.done)
            .finish()
    }
}

impl<'c> PgMultiResult<'c> {
    /// The outcome of the next statement: `Ok(None)` once the terminating
    /// `ReadyForQuery` has been consumed.
    pub async fn next_result(&mut self) -> Result<Option<PgQueryResult>, Error> {
        if self.done {
            return Ok(None);
        }

        let mut result = PgQueryResult::default();

        loop {
            let message = match self.conn.stream.recv().await {
                Ok(message) => message,

                // a failed statement; the stream continues (and usually
                // ends at ReadyForQuery) on the next call
                Err(err @ Error::Database(_)) => return Err(err),

                Err(err) => {
                    self.done = true;
                    return Err(self.conn.fuse(err));
                }
            };

            match message.format {
                MessageFormat::RowDescription => {
                    result.fields = RowDescription::decode(message.contents)?.fields;
                }

                MessageFormat::DataRow => {
                    result.rows.push(PgRow {
                        data: DataRow::decode(message.contents)?,
                    });
                }

                MessageFormat::CommandComplete => {
                    let complete = CommandComplete::decode(message.contents)?;

                    result.rows_affected = complete.rows_affected();
                    result.command_tag = complete.tag().to_owned();

                    return Ok(Some(result));
                }

                MessageFormat::EmptyQueryResponse => {
                    return Ok(Some(result));
                }

                MessageFormat::ReadyForQuery => {
                    self.conn.handle_ready_for_query(message.contents)?;
                    self.done = true;

                    return Ok(None);
                }

                MessageFormat::CopyInResponse => {
                    // a COPY FROM STDIN reached through the generic query
                    // path; refuse it and let the resulting error report
                    // through the normal channel
                    self.conn
                        .stream
                        .write(CopyFail {
                            message: "COPY FROM STDIN is not supported by exec; use copy_from",
                        })
                        .map_err(|e| self.conn.fuse(e))?;
                    self.conn
                        .stream
                        .flush()
                        .await
                        .map_err(|e| self.conn.fuse(e))?;
                }

                MessageFormat::CopyOutResponse | MessageFormat::CopyData
                | MessageFormat::CopyDone => {
                    // drain and discard a COPY TO STDOUT; its
                    // CommandComplete closes the result as usual
                }

                format => {
                    self.done = true;
                    return Err(self
                        .conn
                        .fuse(err_protocol!("unexpected message in query stream: {format:?}")));
                }
            }
        }
    }

    /// Collect every remaining result. The first failed statement aborts
    /// collection and is returned; the connection itself remains usable.
    pub async fn read_all(mut self) -> Result<Vec<PgQueryResult>, Error> {
        let mut results = Vec::new();

        while let Some(result) = self.next_result().await? {
            results.push(result);
        }

        Ok(results)
    }
}

impl PgConnection {
    /// Execute one or more SQL statements with the simple query protocol.
    ///
    /// Multi-statement strings run in an implicit transaction. Parameters
    /// are not supported here; use [`exec_params`] for that.
    ///
    /// [`exec_params`]: Self::exec_params
    pub async fn exec(&mut self, sql: &str) -> Result<PgMultiResult<'_>, Error> {
        self.ensure_usable()?;
        self.wait_until_ready().await?;

        self.stream.write(Query(sql))?;
        self.stream.flush().await.map_err(|e| self.fuse(e))?;
        self.pending_ready_for_query_count += 1;

        Ok(PgMultiResult {
            conn: self,
            done: false,
        })
    }

    /// Execute one parameterized statement through the extended query
    /// protocol, using the unnamed server statement:
    /// `Parse` → `Bind` → `Describe` → `Execute` → `Sync`, pipelined into
    /// a single round trip.
    pub async fn exec_params<'c>(
        &'c mut self,
        sql: &str,
        params: PgParams<'_>,
    ) -> Result<PgResultReader<'c>, Error> {
        self.ensure_usable()?;
        self.wait_until_ready().await?;

        self.start_extended(Some(sql), "", params)
            .await
            .map(move |step| PgResultReader {
                conn: self,
                step,
                fields: Vec::new(),
                command_tag: String::new(),
                rows_affected: 0,
            })
    }

    /// Execute a previously prepared statement; identical to
    /// [`exec_params`] minus the `Parse`.
    ///
    /// [`exec_params`]: Self::exec_params
    pub async fn exec_prepared<'c>(
        &'c mut self,
        statement: &StatementDescription,
        params: PgParams<'_>,
    ) -> Result<PgResultReader<'c>, Error> {
        self.ensure_usable()?;
        self.wait_until_ready().await?;

        self.start_extended(None, &statement.name, params)
            .await
            .map(move |step| PgResultReader {
                conn: self,
                step,
                fields: Vec::new(),
                command_tag: String::new(),
                rows_affected: 0,
            })
    }

    // Queue and flush the messages of one extended-query exchange; returns
    // the state the response walk starts in.
    async fn start_extended(
        &mut self,
        parse_sql: Option<&str>,
        statement: &str,
        params: PgParams<'_>,
    ) -> Result<ExtendedStep, Error> {
        let first_step = if let Some(sql) = parse_sql {
            self.stream.write(Parse {
                statement: "",
                query: sql,
                param_types: params.param_oids,
            })?;

            ExtendedStep::AwaitingParseComplete
        } else {
            ExtendedStep::AwaitingBindComplete
        };

        self.stream.write(Bind {
            portal: "",
            statement,
            formats: params.param_formats,
            params: params.params,
            result_formats: params.result_formats,
        })?;

        self.stream.write(Describe::Portal(""))?;

        self.stream.write(Execute {
            portal: "",
            limit: 0,
        })?;

        self.stream.write(Sync)?;

        self.stream.flush().await.map_err(|e| self.fuse(e))?;
        self.pending_ready_for_query_count += 1;

        Ok(first_step)
    }

    /// Prepare a named statement and return its description.
    ///
    /// An empty `name` prepares the unnamed statement, which the server
    /// replaces on the next unnamed `Parse`.
    pub async fn prepare(
        &mut self,
        name: &str,
        sql: &str,
        param_oids: &[Oid],
    ) -> Result<StatementDescription, Error> {
        self.ensure_usable()?;
        self.wait_until_ready().await?;

        self.stream.write(Parse {
            statement: name,
            query: sql,
            param_types: param_oids,
        })?;
        self.stream.write(Describe::Statement(name))?;
        self.stream.write(Sync)?;

        self.stream.flush().await.map_err(|e| self.fuse(e))?;
        self.pending_ready_for_query_count += 1;

        match self.read_statement_description(name, sql).await {
            Ok(sd) => Ok(sd),

            Err(err @ Error::Database(_)) => {
                self.resync_to_ready().await?;
                Err(err)
            }

            Err(err) => Err(self.fuse(err)),
        }
    }

    async fn read_statement_description(
        &mut self,
        name: &str,
        sql: &str,
    ) -> Result<StatementDescription, Error> {
        // indicates that the SQL query string is now successfully parsed
        // and has semantic validity
        let _: () = self
            .stream
            .recv_expect(MessageFormat::ParseComplete)
            .await?;

        // describes the parameters needed by the statement
        let params: ParameterDescription = self
            .stream
            .recv_expect(MessageFormat::ParameterDescription)
            .await?;

        let fields = match self.stream.recv().await? {
            // describes the rows that will be returned when the statement
            // is eventually executed
            message if message.format == MessageFormat::RowDescription => {
                RowDescription::decode(message.contents)?.fields
            }

            // no data would be returned if this statement was executed
            message if message.format == MessageFormat::NoData => Vec::new(),

            message => {
                return Err(err_protocol!(
                    "expecting RowDescription or NoData but received {:?}",
                    message.format
                ));
            }
        };

        self.resync_to_ready().await?;

        Ok(StatementDescription {
            name: name.to_owned(),
            sql: sql.to_owned(),
            param_oids: params.types,
            fields,
        })
    }

    /// Execute through the prepared-statement cache.
    ///
    /// In [`CacheMode::Prepare`] a miss prepares the statement under a
    /// generated server-side name and later executions skip parsing
    /// entirely; in [`CacheMode::Describe`] only the description is
    /// cached. Entries the server reports as invalid (SQLSTATE `0A000`,
    /// "cached plan must not change result type") are flushed and the
    /// next execution re-prepares.
    pub async fn exec_cached(
        &mut self,
        sql: &str,
        params: PgParams<'_>,
    ) -> Result<PgQueryResult, Error> {
        self.ensure_usable()?;

        // deallocation of previously invalidated names, deferred while a
        // (failed) transaction was open
        self.flush_invalidated_statements().await?;

        let cached = self.cache.get(sql).cloned();

        let sd = match cached {
            Some(sd) => sd,

            None => {
                let sd = match self.cache_mode() {
                    CacheMode::Prepare => {
                        let name = self.next_statement_name();
                        self.prepare(&name, sql, params.param_oids).await?
                    }

                    CacheMode::Describe => self.prepare("", sql, params.param_oids).await?,
                };

                self.cache.put(sd.clone());

                sd
            }
        };

        let result = match self.cache_mode() {
            CacheMode::Prepare => self.exec_prepared(&sd, params).await?.read_all().await,

            // the unnamed statement does not survive other parses; always
            // re-parse, with the parameter types the description pinned
            CacheMode::Describe => {
                let params = PgParams {
                    param_oids: &sd.param_oids,
                    ..params
                };

                self.exec_params(sql, params).await?.read_all().await
            }
        };

        if let Err(err) = &result {
            if let Some(db) = err.as_database_error() {
                // "cached plan must not change result type": the statement
                // refers to schema that has changed shape
                if db.code() == "0A000" {
                    self.statement_errored(sql);

                    // outside a transaction the dead name is released
                    // eagerly; inside a failed transaction this is a no-op
                    // and the next exec_cached picks it up after resync
                    let _ = self.flush_invalidated_statements().await;
                }
            }
        }

        result
    }
}
