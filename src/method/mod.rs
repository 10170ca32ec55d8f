//! Function registry.
//!
//! Maps LabKey SQL function names to an arity range, a result type and an
//! emission strategy. The registry is built once and shared read-only by
//! every query; per-dialect tables shadow the generic one.

pub mod aggregate;
pub mod synth;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use strsim::levenshtein;

use crate::dialect::{Dialect, Interval, SqlDialect};
use crate::environment::Environment;
use crate::fragment::SqlFragment;
use crate::types::JdbcType;

pub use aggregate::AggregateInfo;
pub use synth::Synth;

/// How a call is turned into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// A portable function; the dialect supplies the native spelling.
    Jdbc,
    /// Emitted as `NAME(args)` exactly as written.
    Passthrough,
    /// Expanded into a multi-step SQL expression.
    Synth(Synth),
    /// A compile-time constant from the environment, bound as a parameter.
    Environment(EnvValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvValue {
    UserId,
    UserName,
    FolderName,
    FolderPath,
    ContextPath,
    Version,
    ModuleProperty,
    IsMemberOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Fixed(JdbcType),
    /// Type of the first value argument.
    FirstArg,
    /// Common type of every argument.
    Promote,
}

impl ResultType {
    pub fn resolve(self, args: &[JdbcType]) -> JdbcType {
        match self {
            ResultType::Fixed(t) => t,
            ResultType::FirstArg => args.first().copied().unwrap_or(JdbcType::Other),
            ResultType::Promote => args
                .iter()
                .copied()
                .reduce(JdbcType::promote)
                .unwrap_or(JdbcType::Other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: &'static str,
    pub kind: MethodKind,
    pub min_args: usize,
    pub max_args: usize,
    pub result: ResultType,
    /// Argument position holding a `SQL_TSI_*` interval keyword.
    pub interval_arg: Option<usize>,
}

impl MethodInfo {
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && count <= self.max_args
    }

    pub fn arity(&self) -> String {
        match (self.min_args, self.max_args) {
            (a, b) if a == b => a.to_string(),
            (a, usize::MAX) => format!("{} or more", a),
            (a, b) => format!("{} to {}", a, b),
        }
    }

    /// Whether the emitted SQL is a predicate rather than a value.
    pub fn is_predicate(&self) -> bool {
        matches!(
            self.kind,
            MethodKind::Synth(
                Synth::IsEqual
                    | Synth::StartsWith
                    | Synth::IsDistinctFrom
                    | Synth::IsNotDistinctFrom
                    | Synth::Overlaps
                    | Synth::SimilarTo
                    | Synth::RegexpLike
            ) | MethodKind::Environment(EnvValue::IsMemberOf)
        )
    }
}

/// Arguments of one call, already rendered.
pub struct CallArgs<'a> {
    pub dialect: &'a dyn SqlDialect,
    pub env: &'a Environment,
    pub args: Vec<SqlFragment>,
    pub types: Vec<JdbcType>,
    /// String-literal text of each argument, when it is one.
    pub literals: Vec<Option<String>>,
    pub interval: Option<Interval>,
}

impl CallArgs<'_> {
    pub fn arg(&self, i: usize) -> SqlFragment {
        self.args.get(i).cloned().unwrap_or_default()
    }
}

impl MethodInfo {
    pub fn render(&self, call: &CallArgs<'_>) -> Result<SqlFragment, String> {
        match self.kind {
            MethodKind::Jdbc => Ok(call.dialect.jdbc_function(self.name, &call.args)),
            MethodKind::Passthrough => Ok(crate::dialect::call(
                &self.name.to_uppercase(),
                &call.args,
            )),
            MethodKind::Synth(s) => s.render(self.name, call),
            MethodKind::Environment(e) => synth::environment(e, call),
        }
    }
}

const ANY: usize = usize::MAX;

const fn m(
    name: &'static str,
    kind: MethodKind,
    min_args: usize,
    max_args: usize,
    result: ResultType,
) -> MethodInfo {
    MethodInfo {
        name,
        kind,
        min_args,
        max_args,
        result,
        interval_arg: None,
    }
}

const fn jdbc(name: &'static str, min: usize, max: usize, result: ResultType) -> MethodInfo {
    m(name, MethodKind::Jdbc, min, max, result)
}

const fn pass(name: &'static str, min: usize, max: usize, result: ResultType) -> MethodInfo {
    m(name, MethodKind::Passthrough, min, max, result)
}

const fn synth(
    name: &'static str,
    s: Synth,
    min: usize,
    max: usize,
    result: ResultType,
) -> MethodInfo {
    m(name, MethodKind::Synth(s), min, max, result)
}

const fn env(name: &'static str, e: EnvValue, min: usize, max: usize, ty: JdbcType) -> MethodInfo {
    m(name, MethodKind::Environment(e), min, max, ResultType::Fixed(ty))
}

use JdbcType as T;
use ResultType::{FirstArg, Fixed, Promote};

fn generic_methods() -> Vec<MethodInfo> {
    let mut v = vec![
        // numeric
        jdbc("abs", 1, 1, FirstArg),
        jdbc("acos", 1, 1, Fixed(T::Double)),
        jdbc("asin", 1, 1, Fixed(T::Double)),
        jdbc("atan", 1, 1, Fixed(T::Double)),
        jdbc("atan2", 2, 2, Fixed(T::Double)),
        jdbc("ceiling", 1, 1, FirstArg),
        jdbc("cos", 1, 1, Fixed(T::Double)),
        jdbc("cot", 1, 1, Fixed(T::Double)),
        jdbc("degrees", 1, 1, Fixed(T::Double)),
        jdbc("exp", 1, 1, Fixed(T::Double)),
        jdbc("floor", 1, 1, FirstArg),
        jdbc("log", 1, 1, Fixed(T::Double)),
        jdbc("log10", 1, 1, Fixed(T::Double)),
        jdbc("mod", 2, 2, FirstArg),
        jdbc("pi", 0, 0, Fixed(T::Double)),
        jdbc("power", 2, 2, Fixed(T::Double)),
        jdbc("radians", 1, 1, Fixed(T::Double)),
        jdbc("rand", 0, 1, Fixed(T::Double)),
        synth("round", Synth::Round, 1, 2, FirstArg),
        jdbc("sign", 1, 1, Fixed(T::Integer)),
        jdbc("sin", 1, 1, Fixed(T::Double)),
        jdbc("sqrt", 1, 1, Fixed(T::Double)),
        jdbc("tan", 1, 1, Fixed(T::Double)),
        jdbc("truncate", 2, 2, FirstArg),
        // string
        jdbc("concat", 2, 2, Fixed(T::Varchar)),
        jdbc("lcase", 1, 1, Fixed(T::Varchar)),
        jdbc("lower", 1, 1, Fixed(T::Varchar)),
        jdbc("ucase", 1, 1, Fixed(T::Varchar)),
        jdbc("upper", 1, 1, Fixed(T::Varchar)),
        jdbc("left", 2, 2, Fixed(T::Varchar)),
        jdbc("length", 1, 1, Fixed(T::Integer)),
        jdbc("locate", 2, 3, Fixed(T::Integer)),
        jdbc("ltrim", 1, 1, Fixed(T::Varchar)),
        jdbc("rtrim", 1, 1, Fixed(T::Varchar)),
        jdbc("repeat", 2, 2, Fixed(T::Varchar)),
        jdbc("substring", 2, 3, Fixed(T::Varchar)),
        synth("startswith", Synth::StartsWith, 2, 2, Fixed(T::Boolean)),
        // date and time
        jdbc("curdate", 0, 0, Fixed(T::Date)),
        jdbc("curtime", 0, 0, Fixed(T::Time)),
        jdbc("now", 0, 0, Fixed(T::Timestamp)),
        jdbc("dayofmonth", 1, 1, Fixed(T::Integer)),
        jdbc("dayofweek", 1, 1, Fixed(T::Integer)),
        jdbc("dayofyear", 1, 1, Fixed(T::Integer)),
        jdbc("hour", 1, 1, Fixed(T::Integer)),
        jdbc("minute", 1, 1, Fixed(T::Integer)),
        jdbc("month", 1, 1, Fixed(T::Integer)),
        jdbc("monthname", 1, 1, Fixed(T::Varchar)),
        jdbc("quarter", 1, 1, Fixed(T::Integer)),
        jdbc("second", 1, 1, Fixed(T::Integer)),
        jdbc("week", 1, 1, Fixed(T::Integer)),
        jdbc("year", 1, 1, Fixed(T::Integer)),
        synth("age_in_years", Synth::AgeInYears, 2, 2, Fixed(T::Integer)),
        synth("age_in_months", Synth::AgeInMonths, 2, 2, Fixed(T::Integer)),
        // null handling and comparison
        pass("coalesce", 1, ANY, Promote),
        jdbc("ifnull", 2, 2, Promote),
        pass("nullif", 2, 2, FirstArg),
        synth("greatest", Synth::Greatest, 1, ANY, Promote),
        synth("least", Synth::Least, 1, ANY, Promote),
        synth("isequal", Synth::IsEqual, 2, 2, Fixed(T::Boolean)),
        synth("is_distinct_from", Synth::IsDistinctFrom, 2, 2, Fixed(T::Boolean)),
        synth("is_not_distinct_from", Synth::IsNotDistinctFrom, 2, 2, Fixed(T::Boolean)),
        // environment
        env("userid", EnvValue::UserId, 0, 0, T::Integer),
        env("username", EnvValue::UserName, 0, 0, T::Varchar),
        env("foldername", EnvValue::FolderName, 0, 0, T::Varchar),
        env("folderpath", EnvValue::FolderPath, 0, 0, T::Varchar),
        env("contextpath", EnvValue::ContextPath, 0, 0, T::Varchar),
        env("version", EnvValue::Version, 0, 0, T::Decimal),
        env("moduleproperty", EnvValue::ModuleProperty, 2, 2, T::Varchar),
        env("ismemberof", EnvValue::IsMemberOf, 1, 1, T::Boolean),
    ];
    v.push(MethodInfo {
        interval_arg: Some(0),
        ..synth("timestampadd", Synth::TimestampAdd, 3, 3, Fixed(T::Timestamp))
    });
    v.push(MethodInfo {
        interval_arg: Some(0),
        ..synth("timestampdiff", Synth::TimestampDiff, 3, 3, Fixed(T::Integer))
    });
    v.push(MethodInfo {
        interval_arg: Some(2),
        ..synth("age", Synth::Age, 2, 3, Fixed(T::Integer))
    });
    v
}

fn postgres_methods() -> Vec<MethodInfo> {
    let mut v = vec![
        pass("ascii", 1, 1, Fixed(T::Integer)),
        pass("btrim", 1, 2, Fixed(T::Varchar)),
        pass("char_length", 1, 1, Fixed(T::Integer)),
        pass("character_length", 1, 1, Fixed(T::Integer)),
        pass("chr", 1, 1, Fixed(T::Varchar)),
        pass("concat_ws", 2, ANY, Fixed(T::Varchar)),
        pass("decode", 2, 2, Fixed(T::Binary)),
        pass("encode", 2, 2, Fixed(T::Varchar)),
        pass("initcap", 1, 1, Fixed(T::Varchar)),
        pass("lpad", 2, 3, Fixed(T::Varchar)),
        pass("md5", 1, 1, Fixed(T::Varchar)),
        pass("octet_length", 1, 1, Fixed(T::Integer)),
        synth("overlaps", Synth::Overlaps, 4, 4, Fixed(T::Boolean)),
        pass("quote_ident", 1, 1, Fixed(T::Varchar)),
        pass("quote_literal", 1, 1, Fixed(T::Varchar)),
        pass("regexp_replace", 3, 4, Fixed(T::Varchar)),
        pass("repeat", 2, 2, Fixed(T::Varchar)),
        pass("replace", 3, 3, Fixed(T::Varchar)),
        pass("rpad", 2, 3, Fixed(T::Varchar)),
        synth("similar_to", Synth::SimilarTo, 2, 3, Fixed(T::Boolean)),
        pass("split_part", 3, 3, Fixed(T::Varchar)),
        pass("strpos", 2, 2, Fixed(T::Integer)),
        pass("substr", 2, 3, Fixed(T::Varchar)),
        pass("to_ascii", 1, 2, Fixed(T::Varchar)),
        pass("to_hex", 1, 1, Fixed(T::Varchar)),
        pass("translate", 3, 3, Fixed(T::Varchar)),
        pass("to_char", 2, 2, Fixed(T::Varchar)),
        pass("to_date", 2, 2, Fixed(T::Date)),
        pass("to_timestamp", 1, 2, Fixed(T::Timestamp)),
        pass("to_number", 2, 2, Fixed(T::Decimal)),
        pass("string_to_array", 2, 3, Fixed(T::Other)),
        pass("unnest", 1, 1, Fixed(T::Other)),
        pass("row", 1, ANY, Fixed(T::Other)),
        synth("json_op", Synth::JsonOp, 3, 3, Fixed(T::Other)),
        synth("parse_json", Synth::ParseJson, 1, 1, Fixed(T::Other)),
        synth("parse_jsonb", Synth::ParseJsonb, 1, 1, Fixed(T::Other)),
        pass("to_json", 1, 1, Fixed(T::Other)),
        pass("to_jsonb", 1, 1, Fixed(T::Other)),
    ];
    for name in [
        "json_array_length",
        "json_build_array",
        "json_build_object",
        "json_extract_path",
        "json_extract_path_text",
        "json_object",
        "json_strip_nulls",
        "json_typeof",
        "jsonb_array_length",
        "jsonb_build_array",
        "jsonb_build_object",
        "jsonb_extract_path",
        "jsonb_extract_path_text",
        "jsonb_insert",
        "jsonb_object",
        "jsonb_pretty",
        "jsonb_set",
        "jsonb_strip_nulls",
        "jsonb_typeof",
    ] {
        let result = if name.ends_with("_text") || name.ends_with("typeof") || name.ends_with("pretty")
        {
            Fixed(T::Varchar)
        } else if name.ends_with("length") {
            Fixed(T::Integer)
        } else {
            Fixed(T::Other)
        };
        v.push(pass(name, 1, ANY, result));
    }
    v
}

fn sqlserver_methods() -> Vec<MethodInfo> {
    vec![
        pass("ascii", 1, 1, Fixed(T::Integer)),
        pass("char", 1, 1, Fixed(T::Varchar)),
        synth("chr", Synth::Alias("CHAR"), 1, 1, Fixed(T::Varchar)),
        pass("charindex", 2, 3, Fixed(T::Integer)),
        pass("concat_ws", 2, ANY, Fixed(T::Varchar)),
        pass("difference", 2, 2, Fixed(T::Integer)),
        pass("isnumeric", 1, 1, Fixed(T::Integer)),
        pass("len", 1, 1, Fixed(T::Integer)),
        pass("patindex", 2, 2, Fixed(T::Integer)),
        pass("quotename", 1, 2, Fixed(T::Varchar)),
        pass("replace", 3, 3, Fixed(T::Varchar)),
        pass("replicate", 2, 2, Fixed(T::Varchar)),
        pass("reverse", 1, 1, Fixed(T::Varchar)),
        pass("right", 2, 2, Fixed(T::Varchar)),
        pass("soundex", 1, 1, Fixed(T::Varchar)),
        pass("space", 1, 1, Fixed(T::Varchar)),
        pass("str", 1, 3, Fixed(T::Varchar)),
        pass("stuff", 4, 4, Fixed(T::Varchar)),
        synth("ucase", Synth::Alias("UPPER"), 1, 1, Fixed(T::Varchar)),
        pass("upper", 1, 1, Fixed(T::Varchar)),
    ]
}

fn oracle_methods() -> Vec<MethodInfo> {
    vec![
        pass("to_number", 1, 2, Fixed(T::Decimal)),
        pass("to_char", 1, 2, Fixed(T::Varchar)),
        pass("substr", 2, 3, Fixed(T::Varchar)),
        pass("trim", 1, 1, Fixed(T::Varchar)),
        pass("instr", 2, 4, Fixed(T::Integer)),
        pass("replace", 2, 3, Fixed(T::Varchar)),
        pass("translate", 3, 3, Fixed(T::Varchar)),
        pass("rpad", 2, 3, Fixed(T::Varchar)),
        pass("lpad", 2, 3, Fixed(T::Varchar)),
        pass("ascii", 1, 1, Fixed(T::Integer)),
        pass("initcap", 1, 1, Fixed(T::Varchar)),
        pass("chr", 1, 1, Fixed(T::Varchar)),
        synth("regexp_like", Synth::RegexpLike, 2, 3, Fixed(T::Boolean)),
        pass("to_date", 1, 2, Fixed(T::Date)),
        m("sysdate", MethodKind::Synth(Synth::Keyword), 0, 0, Fixed(T::Timestamp)),
    ]
}

fn index(methods: Vec<MethodInfo>) -> HashMap<&'static str, MethodInfo> {
    methods.into_iter().map(|m| (m.name, m)).collect()
}

static SHARED: LazyLock<Arc<MethodRegistry>> = LazyLock::new(|| Arc::new(MethodRegistry::new()));

/// Immutable function table shared by every query.
#[derive(Debug)]
pub struct MethodRegistry {
    generic: HashMap<&'static str, MethodInfo>,
    dialects: HashMap<Dialect, HashMap<&'static str, MethodInfo>>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut dialects = HashMap::new();
        dialects.insert(Dialect::Postgres, index(postgres_methods()));
        dialects.insert(Dialect::SqlServer, index(sqlserver_methods()));
        dialects.insert(Dialect::Oracle, index(oracle_methods()));
        Self {
            generic: index(generic_methods()),
            dialects,
        }
    }

    /// The process-wide registry.
    pub fn shared() -> Arc<MethodRegistry> {
        Arc::clone(&SHARED)
    }

    /// Dialect table first, then the generic one. Case-insensitive.
    pub fn lookup(&self, name: &str, dialect: Dialect) -> Option<&MethodInfo> {
        let key = name.to_ascii_lowercase();
        self.dialects
            .get(&dialect)
            .and_then(|d| d.get(key.as_str()))
            .or_else(|| self.generic.get(key.as_str()))
    }

    /// Closest known function or aggregate name, for "did you mean" hints.
    pub fn suggest(&self, name: &str, dialect: Dialect) -> Option<&'static str> {
        let input = name.to_ascii_lowercase();
        let threshold = match input.len() {
            0..=2 => 0,
            3..=5 => 2,
            _ => 3,
        };
        self.methods(dialect)
            .into_iter()
            .map(|m| m.name)
            .chain(aggregate::names(dialect))
            .map(|cand| (levenshtein(&input, cand), cand))
            .filter(|(dist, _)| *dist <= threshold)
            .min_by_key(|(dist, cand)| (*dist, *cand))
            .map(|(_, cand)| cand)
    }

    /// Every function visible for a dialect, sorted by name.
    pub fn methods(&self, dialect: Dialect) -> Vec<&MethodInfo> {
        let mut out: HashMap<&'static str, &MethodInfo> =
            self.generic.iter().map(|(k, v)| (*k, v)).collect();
        if let Some(d) = self.dialects.get(&dialect) {
            out.extend(d.iter().map(|(k, v)| (*k, v)));
        }
        let mut list: Vec<&MethodInfo> = out.into_values().collect();
        list.sort_by_key(|m| m.name);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(name: &str, dialect: Dialect, args: &[&str], types: &[JdbcType]) -> String {
        let reg = MethodRegistry::shared();
        let info = reg.lookup(name, dialect).unwrap();
        let generator = dialect.generator();
        let env = Environment::default();
        let call = CallArgs {
            dialect: generator.as_ref(),
            env: &env,
            args: args.iter().map(|a| SqlFragment::from_sql(*a)).collect(),
            types: types.to_vec(),
            literals: vec![None; args.len()],
            interval: None,
        };
        info.render(&call).unwrap().sql().to_string()
    }

    #[test]
    fn test_dialect_table_shadows_generic() {
        let reg = MethodRegistry::new();
        let pg = reg.lookup("REPEAT", Dialect::Postgres).unwrap();
        assert_eq!(pg.kind, MethodKind::Passthrough);
        let lite = reg.lookup("repeat", Dialect::Sqlite).unwrap();
        assert_eq!(lite.kind, MethodKind::Jdbc);
        assert!(reg.lookup("split_part", Dialect::Sqlite).is_none());
        assert!(reg.lookup("split_part", Dialect::Postgres).is_some());
    }

    #[test]
    fn test_arity() {
        let reg = MethodRegistry::shared();
        let coalesce = reg.lookup("coalesce", Dialect::Postgres).unwrap();
        assert!(coalesce.accepts(5));
        assert!(!coalesce.accepts(0));
        assert_eq!(coalesce.arity(), "1 or more");
        assert_eq!(reg.lookup("locate", Dialect::Postgres).unwrap().arity(), "2 to 3");
    }

    #[test]
    fn test_suggestion() {
        let reg = MethodRegistry::shared();
        assert_eq!(reg.suggest("floorr", Dialect::Postgres), Some("floor"));
        assert_eq!(reg.suggest("zz", Dialect::Postgres), None);
    }

    #[test]
    fn test_passthrough_and_jdbc() {
        assert_eq!(
            render("abs", Dialect::Postgres, &["x"], &[JdbcType::Integer]),
            "ABS(x)"
        );
        assert_eq!(
            render("ucase", Dialect::Postgres, &["x"], &[JdbcType::Varchar]),
            "UPPER(x)"
        );
        assert_eq!(
            render("coalesce", Dialect::Oracle, &["a", "b"], &[JdbcType::Integer; 2]),
            "COALESCE(a, b)"
        );
    }

    #[test]
    fn test_result_types() {
        assert_eq!(
            Promote.resolve(&[JdbcType::Integer, JdbcType::Double]),
            JdbcType::Double
        );
        assert_eq!(FirstArg.resolve(&[]), JdbcType::Other);
    }
}
