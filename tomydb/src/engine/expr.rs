/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Typed expression trees with vectorized per-batch evaluation.
//!
//! Expressions are type-checked when they are built (at plan time); an
//! ill-typed tree never reaches execution. Evaluation receives a whole chunk
//! plus a column-name to index mapping and produces a new column of
//! `row_count` rows.

use crate::engine::chunk::ChunkColumn;
use crate::engine::chunk::ChunkColumnType;
use crate::engine::chunk::ChunkResult;
use crate::error::EngineError;
use crate::error::ValidationError;
use std::collections::BTreeSet;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

impl UnaryOperator {
    pub fn from_str(op: &str) -> Result<Self, EngineError> {
        match op {
            "NOT" => Ok(UnaryOperator::Not),
            "MINUS" => Ok(UnaryOperator::Minus),
            other => Err(EngineError::validation(
                format!("unknown unary operator: {other}"),
                "",
            )),
        }
    }
}

impl std::fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Not => write!(f, "NOT"),
            UnaryOperator::Minus => write!(f, "MINUS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl BinaryOperator {
    pub fn from_str(op: &str) -> Result<Self, EngineError> {
        match op {
            "ADD" => Ok(BinaryOperator::Add),
            "SUBTRACT" => Ok(BinaryOperator::Subtract),
            "MULTIPLY" => Ok(BinaryOperator::Multiply),
            "DIVIDE" => Ok(BinaryOperator::Divide),
            "AND" => Ok(BinaryOperator::And),
            "OR" => Ok(BinaryOperator::Or),
            "EQUAL" => Ok(BinaryOperator::Equal),
            "NOT_EQUAL" => Ok(BinaryOperator::NotEqual),
            "LESS_THAN" => Ok(BinaryOperator::LessThan),
            "LESS_EQUAL" => Ok(BinaryOperator::LessEqual),
            "GREATER_THAN" => Ok(BinaryOperator::GreaterThan),
            "GREATER_EQUAL" => Ok(BinaryOperator::GreaterEqual),
            other => Err(EngineError::validation(
                format!("unknown binary operator: {other}"),
                "",
            )),
        }
    }

    fn wire_name(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "ADD",
            BinaryOperator::Subtract => "SUBTRACT",
            BinaryOperator::Multiply => "MULTIPLY",
            BinaryOperator::Divide => "DIVIDE",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Equal => "EQUAL",
            BinaryOperator::NotEqual => "NOT_EQUAL",
            BinaryOperator::LessThan => "LESS_THAN",
            BinaryOperator::LessEqual => "LESS_EQUAL",
            BinaryOperator::GreaterThan => "GREATER_THAN",
            BinaryOperator::GreaterEqual => "GREATER_EQUAL",
        }
    }

    fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
        )
    }

    fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    StrLen,
    Concat,
    Replace,
    Upper,
    Lower,
}

impl FunctionName {
    pub fn from_str(name: &str) -> Result<Self, EngineError> {
        match name {
            "STRLEN" => Ok(FunctionName::StrLen),
            "CONCAT" => Ok(FunctionName::Concat),
            "REPLACE" => Ok(FunctionName::Replace),
            "UPPER" => Ok(FunctionName::Upper),
            "LOWER" => Ok(FunctionName::Lower),
            other => Err(EngineError::validation(
                format!("unknown function: {other}"),
                "",
            )),
        }
    }
}

impl std::fmt::Display for FunctionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionName::StrLen => write!(f, "STRLEN"),
            FunctionName::Concat => write!(f, "CONCAT"),
            FunctionName::Replace => write!(f, "REPLACE"),
            FunctionName::Upper => write!(f, "UPPER"),
            FunctionName::Lower => write!(f, "LOWER"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int64(i64),
    Varchar(String),
    Boolean(bool),
}

impl Literal {
    fn column_type(&self) -> ChunkColumnType {
        match self {
            Literal::Int64(_) => ChunkColumnType::Int64,
            Literal::Varchar(_) => ChunkColumnType::Varchar,
            Literal::Boolean(_) => ChunkColumnType::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    ColumnRef {
        name: String,
        column_type: ChunkColumnType,
    },
    Literal(Literal),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Function {
        name: FunctionName,
        args: Vec<Expression>,
    },
}

impl Expression {
    /// Type-checked unary node.
    pub fn unary(op: UnaryOperator, operand: Expression) -> Result<Expression, EngineError> {
        let ot = operand.result_type();
        match op {
            UnaryOperator::Not if ot != ChunkColumnType::Boolean => {
                return Err(EngineError::validation(
                    format!("NOT operator requires BOOLEAN, got {ot}"),
                    "",
                ))
            }
            UnaryOperator::Minus if ot != ChunkColumnType::Int64 => {
                return Err(EngineError::validation(
                    format!("MINUS operator requires INT64, got {ot}"),
                    "",
                ))
            }
            _ => {}
        }
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Type-checked binary node.
    pub fn binary(
        op: BinaryOperator,
        left: Expression,
        right: Expression,
    ) -> Result<Expression, EngineError> {
        let lt = left.result_type();
        let rt = right.result_type();

        if op.is_arithmetic() && (lt != ChunkColumnType::Int64 || rt != ChunkColumnType::Int64) {
            return Err(EngineError::validation(
                format!("operator {op} requires INT64 operands, got {lt} and {rt}"),
                "",
            ));
        }
        if op.is_logical() && (lt != ChunkColumnType::Boolean || rt != ChunkColumnType::Boolean) {
            return Err(EngineError::validation(
                format!("logical operator {op} requires BOOLEAN operands"),
                "",
            ));
        }
        if !op.is_arithmetic() && !op.is_logical() && lt != rt {
            return Err(EngineError::validation(
                format!("comparison {op} requires identical types, got {lt} and {rt}"),
                "",
            ));
        }

        Ok(Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Type-checked function call.
    pub fn function(name: FunctionName, args: Vec<Expression>) -> Result<Expression, EngineError> {
        let mut ve = ValidationError::new();
        match name {
            FunctionName::StrLen | FunctionName::Upper | FunctionName::Lower => {
                if args.len() != 1 {
                    ve.add(format!("{name} expects 1 argument, got {}", args.len()), "");
                } else if args[0].result_type() != ChunkColumnType::Varchar {
                    ve.add(
                        format!(
                            "{name} argument must be VARCHAR, got {}",
                            args[0].result_type()
                        ),
                        "",
                    );
                }
            }
            FunctionName::Concat => {
                if args.len() < 2 {
                    ve.add("CONCAT expects at least 2 arguments", "");
                }
                for (i, arg) in args.iter().enumerate() {
                    if arg.result_type() != ChunkColumnType::Varchar {
                        ve.add(
                            format!("CONCAT argument {i} must be VARCHAR, got {}", arg.result_type()),
                            "",
                        );
                    }
                }
            }
            FunctionName::Replace => {
                if args.len() != 3 {
                    ve.add("REPLACE expects 3 arguments (source, old, new)", "");
                } else {
                    for arg in &args {
                        if arg.result_type() != ChunkColumnType::Varchar {
                            ve.add("REPLACE arguments must be VARCHAR", "");
                            break;
                        }
                    }
                }
            }
        }
        ve.into_result()?;
        Ok(Expression::Function { name, args })
    }

    pub fn result_type(&self) -> ChunkColumnType {
        match self {
            Expression::ColumnRef { column_type, .. } => *column_type,
            Expression::Literal(lit) => lit.column_type(),
            Expression::Unary { op, .. } => match op {
                UnaryOperator::Not => ChunkColumnType::Boolean,
                UnaryOperator::Minus => ChunkColumnType::Int64,
            },
            Expression::Binary { op, .. } => {
                if op.is_arithmetic() {
                    ChunkColumnType::Int64
                } else {
                    ChunkColumnType::Boolean
                }
            }
            Expression::Function { name, .. } => match name {
                FunctionName::StrLen => ChunkColumnType::Int64,
                _ => ChunkColumnType::Varchar,
            },
        }
    }

    /// Collect the column names this expression reads.
    pub fn collect_used_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::ColumnRef { name, .. } => {
                out.insert(name.clone());
            }
            Expression::Literal(_) => {}
            Expression::Unary { operand, .. } => operand.collect_used_columns(out),
            Expression::Binary { left, right, .. } => {
                left.collect_used_columns(out);
                right.collect_used_columns(out);
            }
            Expression::Function { args, .. } => {
                for arg in args {
                    arg.collect_used_columns(out);
                }
            }
        }
    }

    /// Evaluate over a whole batch, producing a column of `row_count` rows.
    pub fn evaluate(
        &self,
        batch: &ChunkResult,
        col_mapping: &HashMap<String, usize>,
    ) -> Result<ChunkColumn, EngineError> {
        match self {
            Expression::ColumnRef { name, .. } => {
                let idx = *col_mapping.get(name).ok_or_else(|| {
                    EngineError::Runtime(format!("column {name} not found in batch"))
                })?;
                batch
                    .columns
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| EngineError::Runtime("column index out of bounds".into()))
            }
            Expression::Literal(lit) => Ok(evaluate_literal(lit, batch.row_count)),
            Expression::Unary { op, operand } => {
                let col = operand.evaluate(batch, col_mapping)?;
                evaluate_unary(*op, &col)
            }
            Expression::Binary { op, left, right } => {
                let left_col = left.evaluate(batch, col_mapping)?;
                let right_col = right.evaluate(batch, col_mapping)?;
                evaluate_binary(*op, &left_col, &right_col, batch.row_count as usize)
            }
            Expression::Function { name, args } => {
                let mut arg_cols = Vec::with_capacity(args.len());
                for arg in args {
                    arg_cols.push(arg.evaluate(batch, col_mapping)?);
                }
                evaluate_function(*name, &arg_cols, batch.row_count as usize)
            }
        }
    }
}

/// Unique column names used across a list of expressions, sorted.
pub fn used_columns_from_expressions(exprs: &[&Expression]) -> Vec<String> {
    let mut set = BTreeSet::new();
    for e in exprs {
        e.collect_used_columns(&mut set);
    }
    set.into_iter().collect()
}

fn evaluate_literal(lit: &Literal, row_count: u64) -> ChunkColumn {
    match lit {
        Literal::Int64(v) => ChunkColumn::Int64 {
            name: "literal".into(),
            values: vec![*v; row_count as usize],
        },
        Literal::Boolean(v) => ChunkColumn::Boolean {
            name: "literal".into(),
            values: vec![*v; row_count as usize],
        },
        Literal::Varchar(v) => {
            let bytes = v.as_bytes();
            let mut offsets = Vec::with_capacity(row_count as usize);
            let mut data = Vec::with_capacity(bytes.len() * row_count as usize);
            for _ in 0..row_count {
                offsets.push(data.len() as u64);
                data.extend_from_slice(bytes);
            }
            ChunkColumn::Varchar {
                name: "literal".into(),
                offsets,
                data,
            }
        }
    }
}

fn evaluate_unary(op: UnaryOperator, col: &ChunkColumn) -> Result<ChunkColumn, EngineError> {
    match (op, col) {
        (UnaryOperator::Not, ChunkColumn::Boolean { values, .. }) => Ok(ChunkColumn::Boolean {
            name: "result".into(),
            values: values.iter().map(|v| !v).collect(),
        }),
        (UnaryOperator::Minus, ChunkColumn::Int64 { values, .. }) => Ok(ChunkColumn::Int64 {
            name: "result".into(),
            values: values.iter().map(|v| v.wrapping_neg()).collect(),
        }),
        (op, col) => Err(EngineError::Runtime(format!(
            "unary {op} applied to {} column",
            col.column_type()
        ))),
    }
}

fn evaluate_binary(
    op: BinaryOperator,
    left: &ChunkColumn,
    right: &ChunkColumn,
    row_count: usize,
) -> Result<ChunkColumn, EngineError> {
    if op.is_arithmetic() {
        let (l, r) = match (left, right) {
            (ChunkColumn::Int64 { values: l, .. }, ChunkColumn::Int64 { values: r, .. }) => (l, r),
            _ => {
                return Err(EngineError::Runtime(
                    "arithmetic operand is not an INT64 column".into(),
                ))
            }
        };
        let mut values = Vec::with_capacity(row_count);
        for i in 0..row_count {
            let v = match op {
                BinaryOperator::Add => l[i].wrapping_add(r[i]),
                BinaryOperator::Subtract => l[i].wrapping_sub(r[i]),
                BinaryOperator::Multiply => l[i].wrapping_mul(r[i]),
                BinaryOperator::Divide => {
                    if r[i] == 0 {
                        return Err(EngineError::Runtime(format!(
                            "division by zero at row {i}"
                        )));
                    }
                    l[i].wrapping_div(r[i])
                }
                _ => unreachable!(),
            };
            values.push(v);
        }
        return Ok(ChunkColumn::Int64 {
            name: "result".into(),
            values,
        });
    }

    if op.is_logical() {
        let (l, r) = match (left, right) {
            (ChunkColumn::Boolean { values: l, .. }, ChunkColumn::Boolean { values: r, .. }) => {
                (l, r)
            }
            _ => {
                return Err(EngineError::Runtime(
                    "logical operand is not a BOOLEAN column".into(),
                ))
            }
        };
        let values = (0..row_count)
            .map(|i| match op {
                BinaryOperator::And => l[i] && r[i],
                BinaryOperator::Or => l[i] || r[i],
                _ => unreachable!(),
            })
            .collect();
        return Ok(ChunkColumn::Boolean {
            name: "result".into(),
            values,
        });
    }

    // Comparisons work on any pair of identically typed columns.
    if left.column_type() != right.column_type() {
        return Err(EngineError::Runtime(
            "comparison operands have different types".into(),
        ));
    }
    let values = (0..row_count)
        .map(|i| {
            let ord = compare_cells_at(left, right, i);
            match op {
                BinaryOperator::Equal => ord == std::cmp::Ordering::Equal,
                BinaryOperator::NotEqual => ord != std::cmp::Ordering::Equal,
                BinaryOperator::LessThan => ord == std::cmp::Ordering::Less,
                BinaryOperator::LessEqual => ord != std::cmp::Ordering::Greater,
                BinaryOperator::GreaterThan => ord == std::cmp::Ordering::Greater,
                BinaryOperator::GreaterEqual => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }
        })
        .collect();
    Ok(ChunkColumn::Boolean {
        name: "result".into(),
        values,
    })
}

fn compare_cells_at(left: &ChunkColumn, right: &ChunkColumn, row: usize) -> std::cmp::Ordering {
    match (left, right) {
        (ChunkColumn::Int64 { values: l, .. }, ChunkColumn::Int64 { values: r, .. }) => {
            l[row].cmp(&r[row])
        }
        (ChunkColumn::Boolean { values: l, .. }, ChunkColumn::Boolean { values: r, .. }) => {
            l[row].cmp(&r[row])
        }
        (
            ChunkColumn::Varchar {
                offsets: lo,
                data: ld,
                ..
            },
            ChunkColumn::Varchar {
                offsets: ro,
                data: rd,
                ..
            },
        ) => ChunkColumn::varchar_row(lo, ld, row).cmp(ChunkColumn::varchar_row(ro, rd, row)),
        _ => std::cmp::Ordering::Equal,
    }
}

fn varchar_parts(col: &ChunkColumn) -> Result<(&Vec<u64>, &Vec<u8>), EngineError> {
    match col {
        ChunkColumn::Varchar { offsets, data, .. } => Ok((offsets, data)),
        other => Err(EngineError::Runtime(format!(
            "function argument is not a VARCHAR column, got {}",
            other.column_type()
        ))),
    }
}

fn evaluate_function(
    name: FunctionName,
    args: &[ChunkColumn],
    row_count: usize,
) -> Result<ChunkColumn, EngineError> {
    match name {
        FunctionName::StrLen => {
            let (offsets, data) = varchar_parts(&args[0])?;
            let values = (0..row_count)
                .map(|i| ChunkColumn::varchar_row(offsets, data, i).len() as i64)
                .collect();
            Ok(ChunkColumn::Int64 {
                name: "strlen".into(),
                values,
            })
        }
        FunctionName::Concat => {
            let mut parts = Vec::with_capacity(args.len());
            let mut total = 0usize;
            for arg in args {
                let (offsets, data) = varchar_parts(arg)?;
                total += data.len();
                parts.push((offsets, data));
            }
            let mut offsets = Vec::with_capacity(row_count);
            let mut data = Vec::with_capacity(total);
            for i in 0..row_count {
                offsets.push(data.len() as u64);
                for (part_offsets, part_data) in &parts {
                    data.extend_from_slice(ChunkColumn::varchar_row(part_offsets, part_data, i));
                }
            }
            Ok(ChunkColumn::Varchar {
                name: "concat".into(),
                offsets,
                data,
            })
        }
        FunctionName::Upper | FunctionName::Lower => {
            let (src_offsets, src_data) = varchar_parts(&args[0])?;
            let mut offsets = Vec::with_capacity(row_count);
            let mut data = Vec::with_capacity(src_data.len());
            for i in 0..row_count {
                offsets.push(data.len() as u64);
                let row = ChunkColumn::varchar_row(src_offsets, src_data, i);
                if name == FunctionName::Upper {
                    data.extend(row.iter().map(|b| b.to_ascii_uppercase()));
                } else {
                    data.extend(row.iter().map(|b| b.to_ascii_lowercase()));
                }
            }
            Ok(ChunkColumn::Varchar {
                name: if name == FunctionName::Upper {
                    "upper".into()
                } else {
                    "lower".into()
                },
                offsets,
                data,
            })
        }
        FunctionName::Replace => {
            let (src_offsets, src_data) = varchar_parts(&args[0])?;
            let (old_offsets, old_data) = varchar_parts(&args[1])?;
            let (new_offsets, new_data) = varchar_parts(&args[2])?;

            let mut offsets = Vec::with_capacity(row_count);
            let mut data = Vec::with_capacity(src_data.len());
            for i in 0..row_count {
                offsets.push(data.len() as u64);
                let src = ChunkColumn::varchar_row(src_offsets, src_data, i);
                let old = ChunkColumn::varchar_row(old_offsets, old_data, i);
                let new = ChunkColumn::varchar_row(new_offsets, new_data, i);
                replace_bytes(src, old, new, &mut data);
            }
            Ok(ChunkColumn::Varchar {
                name: "replace".into(),
                offsets,
                data,
            })
        }
    }
}

// Replaces every non-overlapping occurrence of `old` in `src`, appending the
// rewritten row to `out`. An empty pattern leaves the source unchanged.
fn replace_bytes(src: &[u8], old: &[u8], new: &[u8], out: &mut Vec<u8>) {
    if old.is_empty() {
        out.extend_from_slice(src);
        return;
    }
    let mut rest = src;
    while let Some(idx) = find_subslice(rest, old) {
        out.extend_from_slice(&rest[..idx]);
        out.extend_from_slice(new);
        rest = &rest[idx + old.len()..];
    }
    out.extend_from_slice(rest);
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
