use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::mappings::Mapping;

/// HTTP method of a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    /// Write methods carry their remaining `with` params as a JSON body,
    /// read methods as query-string entries.
    pub fn sends_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference into another statement's result, e.g. `$hero.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRef {
    pub resource: String,
    pub path: Vec<String>,
}

/// One value inside a statement's `with` clause.
///
/// Chained references and the empty-chain sentinel are variants, so
/// structural searches compare tags and can never collide with user data.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Plain(Value),
    Chain(ChainRef),
    EmptyChained,
    List(Vec<ParamValue>),
    Object(Vec<(String, ParamValue)>),
}

impl ParamValue {
    /// True if the empty-chain sentinel appears at any nesting level.
    pub fn has_empty_chained(&self) -> bool {
        match self {
            ParamValue::EmptyChained => true,
            ParamValue::List(items) => items.iter().any(ParamValue::has_empty_chained),
            ParamValue::Object(fields) => fields.iter().any(|(_, v)| v.has_empty_chained()),
            ParamValue::Plain(_) | ParamValue::Chain(_) => false,
        }
    }

    /// Collects the resources referenced by chains at any nesting level.
    pub fn chained_resources<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ParamValue::Chain(chain) => out.push(&chain.resource),
            ParamValue::List(items) => {
                for item in items {
                    item.chained_resources(out);
                }
            }
            ParamValue::Object(fields) => {
                for (_, v) in fields {
                    v.chained_resources(out);
                }
            }
            ParamValue::Plain(_) | ParamValue::EmptyChained => {}
        }
    }

    /// Renders a fully resolved param as a JSON value. Unresolved chains and
    /// sentinels become null; callers short-circuit before reaching them.
    pub fn to_value(&self) -> Value {
        match self {
            ParamValue::Plain(v) => v.clone(),
            ParamValue::Chain(_) | ParamValue::EmptyChained => Value::Null,
            ParamValue::List(items) => Value::Array(items.iter().map(ParamValue::to_value).collect()),
            ParamValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

/// The `with` clause: an ordered param map. Declaration order drives both
/// path substitution and the empty-chain skip message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WithClause(pub Vec<(String, ParamValue)>);

impl WithClause {
    pub fn new(params: Vec<(String, ParamValue)>) -> Self {
        WithClause(params)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Argument of a `matches` filter: a pattern source or an already
/// compiled regex.
#[derive(Debug, Clone)]
pub enum MatchArg {
    Pattern(String),
    Compiled(regex::Regex),
}

impl MatchArg {
    pub fn source(&self) -> &str {
        match self {
            MatchArg::Pattern(s) => s,
            MatchArg::Compiled(r) => r.as_str(),
        }
    }
}

impl PartialEq for MatchArg {
    fn eq(&self, other: &Self) -> bool {
        self.source() == other.source()
    }
}

/// A `matches(path, arg)` projection leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchFilter {
    /// Field path, never empty.
    pub target: Vec<String>,
    pub arg: MatchArg,
}

/// One entry of the `only` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum OnlyField {
    Path(Vec<String>),
    Match(MatchFilter),
}

/// Target of an `in` clause: merge the statement body into another
/// resource's body at the given path.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTarget {
    pub resource: String,
    pub path: Vec<String>,
}

/// Cache directives declared on a statement and echoed on its outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheControl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s_max_age: Option<u64>,
}

/// One resolved node of a parsed query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub resource: String,
    pub alias: Option<String>,
    pub method: Method,
    pub with: WithClause,
    pub only: Vec<OnlyField>,
    pub hidden: bool,
    pub ignore_errors: bool,
    pub cache_control: CacheControl,
    pub timeout: Option<Duration>,
    pub aggregate: Option<AggregateTarget>,
}

impl Statement {
    /// Resources this statement depends on through chained params.
    pub fn chained_dependencies(&self) -> Vec<&str> {
        let mut deps = Vec::new();
        for (_, value) in self.with.iter() {
            value.chained_resources(&mut deps);
        }
        deps
    }
}

/// A parsed query: an ordered list of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub statements: Vec<Statement>,
}

/// Identity of a saved query plus per-run switches.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub namespace: String,
    pub id: String,
    pub revision: u64,
    pub tenant: String,
    pub debug: bool,
    /// Query-wide deadline; falls back to the engine default when unset.
    pub global_timeout: Option<Duration>,
}

/// Dynamic inputs forwarded by the caller.
#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub params: HashMap<String, Value>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Bundled evaluation context, immutable once assembled and shared
/// read-only across all concurrent statement tasks.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub mappings: HashMap<String, Mapping>,
    pub options: QueryOptions,
    pub input: QueryInput,
}

/// Key of a statement outcome: the alias when present, the resource
/// name otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn of(statement: &Statement) -> Self {
        ResourceId(
            statement
                .alias
                .clone()
                .unwrap_or_else(|| statement.resource.clone()),
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        ResourceId(s.to_string())
    }
}

/// A single upstream call plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: BTreeMap<String, Value>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub method: Method,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Upstream result envelope. The body is decoded on first access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub url: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
    pub duration: Duration,
}

/// Deferred-decoded response body. The first `unmarshal` parses the raw
/// bytes and memoises the result; the memoisation is race-safe.
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    raw: Vec<u8>,
    decoded: OnceCell<Value>,
}

impl ResponseBody {
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        ResponseBody {
            raw,
            decoded: OnceCell::new(),
        }
    }

    pub fn from_value(value: Value) -> Self {
        ResponseBody {
            raw: Vec::new(),
            decoded: OnceCell::with_value(value),
        }
    }

    /// Decodes the body as JSON. Non-JSON payloads surface as a JSON
    /// string, empty payloads as null.
    pub fn unmarshal(&self) -> &Value {
        self.decoded.get_or_init(|| {
            if self.raw.is_empty() {
                return Value::Null;
            }
            serde_json::from_slice(&self.raw)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.raw).into_owned()))
        })
    }
}

impl PartialEq for ResponseBody {
    fn eq(&self, other: &Self) -> bool {
        self.unmarshal() == other.unmarshal()
    }
}

impl Serialize for ResponseBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.unmarshal().serialize(serializer)
    }
}

impl From<Value> for ResponseBody {
    fn from(value: Value) -> Self {
        ResponseBody::from_value(value)
    }
}

/// Request/response details captured when the query runs in debug mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Debugging {
    pub url: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    pub response_time_ms: u128,
}

/// Status block of a statement outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub status: u16,
    pub success: bool,
    pub ignore_errors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Debugging>,
}

/// Per-statement outcome: status details plus the (possibly projected)
/// result body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DoneResource {
    pub details: Details,
    pub result: ResponseBody,
}

/// Outcome of a statement, single or multiplexed. Multiplexed results are
/// positionally aligned with the input list that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceResult {
    One(DoneResource),
    Many(Vec<ResourceResult>),
}

impl ResourceResult {
    pub fn single(&self) -> Option<&DoneResource> {
        match self {
            ResourceResult::One(dr) => Some(dr),
            ResourceResult::Many(_) => None,
        }
    }
}

impl Default for ResourceResult {
    fn default() -> Self {
        ResourceResult::One(DoneResource::default())
    }
}

/// Full outcome of one query.
pub type Resources = HashMap<ResourceId, ResourceResult>;
