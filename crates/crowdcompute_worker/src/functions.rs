//! Execution of the opaque `func_code` byte string.
//!
//! The foreman forwards `func_code` verbatim as hex and never interprets
//! it (§1). This harness defines the only interpretation that exists on
//! the worker side of that boundary: hex-decode to a UTF-8 name and
//! dispatch to one of a handful of fixture functions, so integration
//! tests can drive real `assign_task` / `task_result` / `task_error`
//! traffic without a real user-function runtime.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("func_code is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("func_code does not decode to utf-8")]
    BadUtf8,
    #[error("unknown function: {0}")]
    Unknown(String),
    #[error("{0}")]
    Runtime(String),
}

/// `x * x`, the fixture named directly in the scenario this repo's test
/// suite is built around: one numeric element in `task_args`.
pub const SQUARE: &str = "square";
/// Sum of a numeric array.
pub const SUM: &str = "sum";
/// Echoes `task_args` back unchanged.
pub const IDENTITY: &str = "identity";
/// Always returns a `task_error`, for exercising the retry path.
pub const ALWAYS_FAIL: &str = "always_fail";
/// Sleeps for `task_args[0]` milliseconds before succeeding, for
/// exercising staleness/timeout sweeps.
pub const SLEEP: &str = "sleep";

pub fn encode(name: &str) -> String {
    hex::encode(name.as_bytes())
}

fn decode_name(func_code: &str) -> Result<String, FunctionError> {
    let bytes = hex::decode(func_code)?;
    String::from_utf8(bytes).map_err(|_| FunctionError::BadUtf8)
}

/// Run the named function against `task_args`, returning the value to
/// report in `task_result` or an error message for `task_error`.
pub async fn execute(func_code: &str, task_args: &Value) -> Result<Value, FunctionError> {
    let name = decode_name(func_code)?;
    match name.as_str() {
        SQUARE => {
            let x = first_number(task_args)?;
            Ok(Value::from(x * x))
        }
        SUM => {
            let total: f64 = task_args
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_f64)
                .sum();
            Ok(Value::from(total))
        }
        IDENTITY => Ok(task_args.clone()),
        ALWAYS_FAIL => Err(FunctionError::Runtime("function always_fail raised".to_string())),
        SLEEP => {
            let millis = first_number(task_args)? as u64;
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            Ok(Value::Bool(true))
        }
        other => Err(FunctionError::Unknown(other.to_string())),
    }
}

fn first_number(task_args: &Value) -> Result<f64, FunctionError> {
    task_args
        .as_array()
        .and_then(|a| a.first())
        .and_then(Value::as_f64)
        .ok_or_else(|| FunctionError::Runtime("expected a single numeric argument".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn square_computes_x_times_x() {
        let func_code = encode(SQUARE);
        let result = execute(&func_code, &serde_json::json!([3])).await.unwrap();
        assert_eq!(result, serde_json::json!(9.0));
    }

    #[tokio::test]
    async fn sum_adds_all_elements() {
        let func_code = encode(SUM);
        let result = execute(&func_code, &serde_json::json!([1, 2, 3])).await.unwrap();
        assert_eq!(result, serde_json::json!(6.0));
    }

    #[tokio::test]
    async fn always_fail_returns_an_error() {
        let func_code = encode(ALWAYS_FAIL);
        assert!(execute(&func_code, &serde_json::json!([])).await.is_err());
    }

    #[tokio::test]
    async fn unknown_function_name_is_an_error() {
        let func_code = encode("not_a_real_function");
        assert!(execute(&func_code, &serde_json::json!([])).await.is_err());
    }
}
