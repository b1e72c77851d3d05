//! Query evaluation.
//!
//! A [`QuerySpec`] is the client's description of a list: filters, sort keys,
//! offset and limit. It is compiled against a collection schema, which
//! resolves every path up front, and then run over the records of a
//! collection to produce an ordered [`ResultSet`].

use crate::{
    error::Result,
    path::{compare_values, Path},
    schema::CollectionSchema,
    Error, Record, VersionTag,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

/// The ordered output of a query.
pub type ResultSet = Vec<Record>;

/// Query parameters owned by the streaming layer rather than the query.
pub const TRANSPORT_PARAMS: [&str; 2] = ["_stream", "_prev"];

/// Identity/version projection of a result set.
pub fn tags_of(records: &[Record]) -> Vec<VersionTag> {
    records.iter().map(Record::tag).collect()
}

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// String has prefix
    Hp,
    /// Member of a comma-separated set
    In,
}

impl FromStr for FilterOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "hp" => Ok(FilterOp::Hp),
            "in" => Ok(FilterOp::In),
            other => Err(Error::UnknownOperator(other.to_string())),
        }
    }
}

/// A single filter predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub path: String,
    pub op: FilterOp,
    /// Operand as sent by the client; parsed into the field's type on compile
    pub value: String,
}

impl Filter {
    pub fn new(path: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op,
            value: value.into(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// A sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub path: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Desc,
        }
    }
}

impl FromStr for Sort {
    type Err = Error;

    /// `+path` or `path` ascending, `-path` descending.
    fn from_str(s: &str) -> Result<Self> {
        let sort = match s.strip_prefix('-') {
            Some(path) => Sort::desc(path),
            None => Sort::asc(s.strip_prefix('+').unwrap_or(s)),
        };
        if sort.path.is_empty() {
            return Err(Error::InvalidQuery(format!("empty sort key: {:?}", s)));
        }
        Ok(sort)
    }
}

/// Filters, sorts, offset and limit for a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, path: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        self.filters.push(Filter::new(path, op, value));
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Build a spec from request parameters.
    ///
    /// - `path=value` filters by equality, `path[op]=value` by `op`
    /// - `_sort=+a,-b` (repeatable) adds sort keys
    /// - `_limit=N`, `_offset=N`
    ///
    /// `_stream` and `_prev` are skipped; any other underscore parameter is
    /// rejected.
    pub fn from_params<I, K, V>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut spec = QuerySpec::new();

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());

            match key {
                "_sort" => {
                    for part in value.split(',').filter(|p| !p.is_empty()) {
                        spec.sorts.push(part.parse()?);
                    }
                }
                "_limit" => spec.limit = Some(parse_count(key, value)?),
                "_offset" => spec.offset = parse_count(key, value)?,
                k if TRANSPORT_PARAMS.contains(&k) => {}
                k if k.starts_with('_') => {
                    return Err(Error::InvalidQuery(format!("unknown parameter: {}", k)));
                }
                k => {
                    let (path, op) = match k.split_once('[') {
                        Some((path, rest)) => {
                            let op = rest.strip_suffix(']').ok_or_else(|| {
                                Error::InvalidQuery(format!("malformed filter key: {}", k))
                            })?;
                            (path, op.parse()?)
                        }
                        None => (k, FilterOp::Eq),
                    };
                    spec.filters.push(Filter::new(path, op, value));
                }
            }
        }

        Ok(spec)
    }

    /// Resolve every path and operand against the schema.
    pub fn compile(&self, schema: &CollectionSchema) -> Result<CompiledQuery> {
        let filters = self
            .filters
            .iter()
            .map(|f| CompiledFilter::new(schema, f))
            .collect::<Result<Vec<_>>>()?;

        let sorts = self
            .sorts
            .iter()
            .map(|s| Ok((Path::resolve(schema, &s.path)?, s.direction)))
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledQuery {
            filters,
            sorts,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| Error::InvalidQuery(format!("{} must be a non-negative integer", key)))
}

#[derive(Debug, Clone)]
enum Operand {
    One(Value),
    Set(Vec<Value>),
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    path: Path,
    op: FilterOp,
    operand: Operand,
}

impl CompiledFilter {
    fn new(schema: &CollectionSchema, filter: &Filter) -> Result<Self> {
        let path = Path::resolve(schema, &filter.path)?;

        let operand = match filter.op {
            FilterOp::In => Operand::Set(
                filter
                    .value
                    .split(',')
                    .map(|v| path.parse_value(v))
                    .collect::<Result<_>>()?,
            ),
            FilterOp::Hp => Operand::One(Value::String(filter.value.clone())),
            _ => Operand::One(path.parse_value(&filter.value)?),
        };

        Ok(Self {
            path,
            op: filter.op,
            operand,
        })
    }

    fn matches(&self, record: &Record) -> bool {
        let actual = self.path.get(record);
        let actual = actual.as_ref();

        match (&self.operand, self.op) {
            (Operand::Set(set), _) => set
                .iter()
                .any(|v| compare_values(actual, Some(v)) == Ordering::Equal),
            (Operand::One(Value::String(prefix)), FilterOp::Hp) => {
                matches!(actual, Some(Value::String(s)) if s.starts_with(prefix.as_str()))
            }
            (Operand::One(expected), op) => {
                let ord = compare_values(actual, Some(expected));
                match op {
                    FilterOp::Eq => ord == Ordering::Equal,
                    // Missing values never satisfy a range comparison.
                    _ if actual.map_or(true, Value::is_null) => false,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Gte => ord != Ordering::Less,
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Lte => ord != Ordering::Greater,
                    FilterOp::Hp | FilterOp::In => false,
                }
            }
        }
    }
}

/// A query whose paths have been resolved against a schema.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    filters: Vec<CompiledFilter>,
    sorts: Vec<(Path, Direction)>,
    limit: Option<usize>,
    offset: usize,
}

impl CompiledQuery {
    /// Whether a record passes every filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Filter, sort, skip and truncate.
    ///
    /// Ties on every sort key fall back to id ascending so the output order
    /// is fully determined by the input set.
    pub fn run<'a, I>(&self, records: I) -> ResultSet
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut keyed: Vec<(Vec<Option<Value>>, &Record)> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .map(|r| (self.sorts.iter().map(|(p, _)| p.get(r)).collect(), r))
            .collect();

        keyed.sort_by(|(ka, a), (kb, b)| {
            for ((l, r), (_, direction)) in ka.iter().zip(kb.iter()).zip(self.sorts.iter()) {
                let ord = compare_values(l.as_ref(), r.as_ref());
                let ord = match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });

        keyed
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|(_, r)| r.clone())
            .collect()
    }
}

/// Evaluate `spec` over `records` of the collection described by `schema`.
pub fn evaluate<'a, I>(schema: &CollectionSchema, records: I, spec: &QuerySpec) -> Result<ResultSet>
where
    I: IntoIterator<Item = &'a Record>,
{
    Ok(spec.compile(schema)?.run(records))
}
