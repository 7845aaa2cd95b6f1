use crate::types::Oid;

/// The description of a prepared statement: what the server needs to know
/// to execute it (`name`), what it was prepared from (`sql`), and what the
/// server reported back from `Describe` (parameter types and row shape).
///
/// Produced by a successful `Parse` + `Describe` round-trip and immutable
/// thereafter. A description with an empty `name` refers to the unnamed
/// statement, which the server replaces on each parse of it.
#[derive(Debug, Clone)]
pub struct StatementDescription {
    /// The server-side statement name; empty for the unnamed statement.
    pub name: String,

    /// The SQL text the statement was prepared from.
    pub sql: String,

    /// The type of each statement parameter, as reported by the server.
    pub param_oids: Vec<Oid>,

    /// The shape of rows the statement produces; empty when it returns no
    /// rows.
    pub fields: Vec<FieldDescription>,
}

/// One column of a row, as described by `RowDescription`.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// The field name.
    pub name: String,

    /// If the field can be identified as a column of a specific table, the
    /// object ID of the table; otherwise zero.
    pub table_oid: u32,

    /// If the field can be identified as a column of a specific table, the
    /// attribute number of the column; otherwise zero.
    pub column_attr: u16,

    /// The object ID of the field's data type.
    pub type_oid: Oid,

    /// The data type size (negative for variable-width types).
    pub type_size: i16,

    /// The type modifier.
    pub type_modifier: i32,

    /// The format code being used for the field (text or binary). In a
    /// `Describe` result this is always text (zero).
    pub format: i16,
}
