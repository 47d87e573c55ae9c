//! Functions every database has installed.

use quiver_common::types::{Date, Value};
use quiver_common::utils::error::{Error, Result};

use super::{FunctionRegistry, Plugin, PluginError};

/// `size`, `lower`, `upper`, `abs`, `coalesce`, `to_string`, `year` and
/// `date`.
///
/// All except `coalesce` return `NULL` for a `NULL` argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFunctions;

impl Plugin for BuiltinFunctions {
    fn name(&self) -> &str {
        "builtins"
    }

    fn register(&self, registry: &mut FunctionRegistry) -> std::result::Result<(), PluginError> {
        registry.register("size", size)?;
        registry.register("lower", |args| map_str("lower", args, str::to_lowercase))?;
        registry.register("upper", |args| map_str("upper", args, str::to_uppercase))?;
        registry.register("abs", abs)?;
        registry.register("coalesce", coalesce)?;
        registry.register("to_string", to_string)?;
        registry.register("year", year)?;
        registry.register("date", date)
    }
}

fn unary<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value> {
    match args {
        [arg] => Ok(arg),
        _ => Err(Error::Query(format!(
            "{name}() takes 1 argument, got {}",
            args.len()
        ))),
    }
}

fn size(args: &[Value]) -> Result<Value> {
    let n = match unary("size", args)? {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => s.chars().count(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => return Err(Error::type_mismatch("size()", "STRING or LIST", other.type_name())),
    };
    Ok(Value::Int64(n as i64))
}

fn map_str(name: &str, args: &[Value], f: fn(&str) -> String) -> Result<Value> {
    match unary(name, args)? {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::from(f(s))),
        other => Err(Error::type_mismatch(format!("{name}()"), "STRING", other.type_name())),
    }
}

fn abs(args: &[Value]) -> Result<Value> {
    match unary("abs", args)? {
        Value::Null => Ok(Value::Null),
        Value::Int64(i) => i
            .checked_abs()
            .map(Value::Int64)
            .ok_or_else(|| Error::InvalidValue(format!("abs({i}) overflows"))),
        Value::Float64(f) => Ok(Value::Float64(f.abs())),
        other => Err(Error::type_mismatch("abs()", "INTEGER or FLOAT", other.type_name())),
    }
}

fn coalesce(args: &[Value]) -> Result<Value> {
    Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
}

fn to_string(args: &[Value]) -> Result<Value> {
    Ok(match unary("to_string", args)? {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(s.clone()),
        other => Value::from(other.to_string()),
    })
}

fn year(args: &[Value]) -> Result<Value> {
    match unary("year", args)? {
        Value::Null => Ok(Value::Null),
        Value::Date(d) => Ok(Value::Int64(i64::from(d.year()))),
        Value::DateTime(t) => Ok(Value::Int64(i64::from(t.date().year()))),
        other => Err(Error::type_mismatch("year()", "DATE or DATETIME", other.type_name())),
    }
}

fn date(args: &[Value]) -> Result<Value> {
    match unary("date", args)? {
        Value::Null => Ok(Value::Null),
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::DateTime(t) => Ok(Value::Date(t.date())),
        Value::String(s) => Date::parse(s)
            .map(Value::Date)
            .ok_or_else(|| Error::InvalidValue(format!("not a date: '{s}'"))),
        other => Err(Error::type_mismatch("date()", "STRING", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::types::Timestamp;
    use quiver_core::execution::FunctionResolver;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        BuiltinFunctions.register(&mut registry).unwrap();
        registry
    }

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        registry().call(name, args).unwrap()
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("upper", &["abc".into()]).unwrap(), Value::from("ABC"));
        assert_eq!(call("LOWER", &["AbC".into()]).unwrap(), Value::from("abc"));
        assert_eq!(call("size", &["héllo".into()]).unwrap(), Value::Int64(5));
        assert_eq!(call("upper", &[Value::Null]).unwrap(), Value::Null);
        assert!(matches!(
            call("upper", &[Value::Int64(1)]),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_size_of_list() {
        let list = Value::list([Value::Int64(1), Value::Int64(2)]);
        assert_eq!(call("size", &[list]).unwrap(), Value::Int64(2));
    }

    #[test]
    fn test_abs() {
        assert_eq!(call("abs", &[Value::Int64(-3)]).unwrap(), Value::Int64(3));
        assert_eq!(call("abs", &[Value::Float64(-1.5)]).unwrap(), Value::Float64(1.5));
        assert!(call("abs", &[Value::Int64(i64::MIN)]).is_err());
    }

    #[test]
    fn test_coalesce_returns_first_non_null() {
        let args = [Value::Null, Value::Int64(7), Value::Int64(8)];
        assert_eq!(call("coalesce", &args).unwrap(), Value::Int64(7));
        assert_eq!(call("coalesce", &[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(call("to_string", &[Value::Int64(12)]).unwrap(), Value::from("12"));
        assert_eq!(call("to_string", &["x".into()]).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_dates() {
        let d = call("date", &["2024-02-29".into()]).unwrap();
        assert_eq!(d, Value::Date(Date::from_ymd(2024, 2, 29).unwrap()));
        assert_eq!(call("year", &[d]).unwrap(), Value::Int64(2024));
        let t = Value::DateTime(Timestamp::from_secs(0));
        assert_eq!(call("year", &[t]).unwrap(), Value::Int64(1970));
        assert!(matches!(
            call("date", &["2024-13-01".into()]),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn test_wrong_arity() {
        assert!(matches!(call("lower", &[]), Err(Error::Query(_))));
    }
}
