//! Directives for the wrapping execution platform
//!
//! The batch platform that launches each stage watches the process stdout
//! for `${CurrentExecution.*}` expressions and applies them to the managed
//! execution record. Everything else this crate prints goes to stderr via
//! the logging layer, so stdout stays parseable.

/// Emits control directives on stdout for the surrounding platform.
pub struct PlatformBridge;

impl PlatformBridge {
    pub fn set_model_error() {
        send("CurrentExecution.SetModelError()");
    }

    pub fn set_data_error() {
        send("CurrentExecution.SetDataError()");
    }

    pub fn set_success() {
        send("CurrentExecution.SetSuccess()");
    }

    pub fn cancel_execution() {
        send("CurrentExecution.CancelExecution()");
    }

    pub fn set_execution_cost(cost: f64) {
        send(&format!("CurrentExecution.SetExecutionCost({cost})"));
    }

    pub fn set_annotation(content: &str) {
        send(&format!("CurrentExecution.SetAnnotation(\"{content}\")"));
    }

    pub fn check_cancellation_requested() {
        send("CurrentExecution.CheckIfExecutionStatusIsCancellationRequested()");
    }

    pub fn set_parameter_value(name: &str, value: &str) {
        send(&format!(
            "CurrentExecution.SetVariableValue(\"{name}\", \"{value}\")"
        ));
    }

    pub fn set_metadata(key: &str, value: &str) {
        send(&format!(
            "CurrentExecution.SetMetadata(\"{key}\", \"{value}\")"
        ));
    }

    pub fn set_execution_artifacts_path(path: &str) {
        send(&format!(
            "CurrentExecution.SetExecutionArtifactsPath(\"{path}\")"
        ));
    }
}

fn send(expr: &str) {
    println!("{}", wrap(expr));
}

fn wrap(expr: &str) -> String {
    format!("${{{expr}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_shape() {
        assert_eq!(
            wrap("CurrentExecution.SetSuccess()"),
            "${CurrentExecution.SetSuccess()}"
        );
    }

    #[test]
    fn test_wrap_metadata_arguments() {
        let expr = format!("CurrentExecution.SetMetadata(\"{}\", \"{}\")", "k", "v");
        assert_eq!(wrap(&expr), "${CurrentExecution.SetMetadata(\"k\", \"v\")}");
    }
}
