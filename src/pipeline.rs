//! The parse/validate pipeline: engine extension hooks, query parsing,
//! document validation, and operation classification.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use apollo_compiler::validation::{DiagnosticList, Valid};
use apollo_compiler::{ast, Schema};

use crate::context::OperationContext;
use crate::engine::{Extension, ParseFinisher, ValidationFinisher};
use crate::error::{Error, ResultError};
use crate::protocol::types::PayloadOperation;
use crate::response::{GraphqlError, Location, Response};

/// Parses and validates the operation payload, driving the extension hooks.
///
/// Any accumulated error, whether from the query itself or from a panicking
/// extension, aborts with a result error; on success the operation context
/// carries the validated document and the subscription flag.
pub(crate) fn parse_operation(
    schema: &Valid<Schema>,
    extensions: &[Arc<dyn Extension>],
    ctx: &Arc<OperationContext>,
    payload: &PayloadOperation,
) -> Result<(), Error> {
    let mut errors = Vec::new();

    for extension in extensions {
        catch_hook(extension.name(), "init", &mut errors, || {
            extension.init(ctx, payload);
        });
    }
    if !errors.is_empty() {
        return Err(result_error(errors));
    }

    let mut parse_finishers: Vec<(String, ParseFinisher)> = Vec::new();
    for extension in extensions {
        let name = extension.name().to_string();
        let finisher = catch_hook(&name, "parse_did_start", &mut errors, || {
            extension.parse_did_start(ctx)
        });
        if let Some(finisher) = finisher {
            parse_finishers.push((name, finisher));
        }
    }

    let (document, mut parse_errors) =
        match ast::Document::parse(payload.query.clone(), "GraphQL request") {
            Ok(document) => (Some(document), Vec::new()),
            Err(with_errors) => (None, diagnostics_to_errors(&with_errors.errors)),
        };

    let first_parse_error = parse_errors.first().cloned();
    for (name, finisher) in parse_finishers {
        catch_hook(&name, "parse_finish", &mut errors, || {
            finisher(first_parse_error.as_ref());
        });
    }
    errors.append(&mut parse_errors);
    let Some(document) = document else {
        return Err(result_error(errors));
    };
    if !errors.is_empty() {
        return Err(result_error(errors));
    }

    let mut validation_finishers: Vec<(String, ValidationFinisher)> = Vec::new();
    for extension in extensions {
        let name = extension.name().to_string();
        let finisher = catch_hook(&name, "validation_did_start", &mut errors, || {
            extension.validation_did_start(ctx)
        });
        if let Some(finisher) = finisher {
            validation_finishers.push((name, finisher));
        }
    }

    let (valid_document, validation_errors) = match document.to_executable_validate(schema) {
        Ok(doc) => (Some(doc), Vec::new()),
        Err(with_errors) => (None, diagnostics_to_errors(&with_errors.errors)),
    };
    for (name, finisher) in validation_finishers {
        catch_hook(&name, "validation_finish", &mut errors, || {
            finisher(&validation_errors);
        });
    }
    errors.extend(validation_errors);

    let Some(valid_document) = valid_document else {
        return Err(result_error(errors));
    };
    if !errors.is_empty() {
        return Err(result_error(errors));
    }

    let subscription = document.definitions.iter().any(|definition| {
        matches!(
            definition,
            ast::Definition::OperationDefinition(operation)
                if operation.operation_type == ast::OperationType::Subscription
        )
    });
    ctx.set_subscription(subscription);
    ctx.set_document(Arc::new(valid_document));

    Ok(())
}

fn result_error(errors: Vec<GraphqlError>) -> Error {
    Error::Result(ResultError {
        result: Response::from_errors(errors),
    })
}

fn diagnostics_to_errors(diagnostics: &DiagnosticList) -> Vec<GraphqlError> {
    diagnostics
        .iter()
        .map(|diagnostic| {
            let mut error = GraphqlError::new(diagnostic.to_string());
            if let Some(range) = diagnostic.line_column_range() {
                error.locations.push(Location {
                    line: range.start.line,
                    column: range.start.column,
                });
            }
            error
        })
        .collect()
}

/// Runs one extension hook, converting a panic into a formatted error
/// attributed to the extension by name. Extension code must not be able to
/// take the server down.
fn catch_hook<R>(
    extension: &str,
    hook: &str,
    errors: &mut Vec<GraphqlError>,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(panic) => {
            errors.push(GraphqlError::new(format!(
                "{extension}.{hook}: {}",
                panic_message(panic.as_ref())
            )));
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;

    fn test_schema() -> Valid<Schema> {
        Schema::parse_and_validate(
            r"
            type Query { getFoo: Int }
            type Mutation { setFoo(value: Int): Boolean }
            type Subscription { fooUpdates: Int }
            ",
            "schema.graphql",
        )
        .expect("valid test schema")
    }

    fn operation_payload(query: &str) -> PayloadOperation {
        PayloadOperation {
            query: query.to_string(),
            ..PayloadOperation::default()
        }
    }

    fn operation_ctx() -> Arc<OperationContext> {
        let request = RequestContext::new();
        OperationContext::new(&request, Some("1".to_string()))
    }

    #[test]
    fn test_query_parses_and_classifies() {
        let schema = test_schema();
        let ctx = operation_ctx();
        parse_operation(&schema, &[], &ctx, &operation_payload("query { getFoo }"))
            .expect("query parses");
        assert!(!ctx.is_subscription());
        assert!(ctx.document().is_some());
    }

    #[test]
    fn test_subscription_sets_flag() {
        let schema = test_schema();
        let ctx = operation_ctx();
        parse_operation(
            &schema,
            &[],
            &ctx,
            &operation_payload("subscription { fooUpdates }"),
        )
        .expect("subscription parses");
        assert!(ctx.is_subscription());
    }

    #[test]
    fn test_syntax_error_aborts_with_result_error() {
        let schema = test_schema();
        let ctx = operation_ctx();
        let err = parse_operation(&schema, &[], &ctx, &operation_payload("query {"))
            .expect_err("syntax error");
        match err {
            Error::Result(result) => assert!(result.result.has_errors()),
            other => panic!("expected result error, got {other}"),
        }
        assert!(ctx.document().is_none());
    }

    #[test]
    fn test_validation_error_aborts_with_result_error() {
        let schema = test_schema();
        let ctx = operation_ctx();
        let err = parse_operation(&schema, &[], &ctx, &operation_payload("query { nope }"))
            .expect_err("unknown field");
        match err {
            Error::Result(result) => assert!(result.result.has_errors()),
            other => panic!("expected result error, got {other}"),
        }
    }

    struct PanickingExtension;

    impl Extension for PanickingExtension {
        fn name(&self) -> &str {
            "chaos"
        }

        fn init(&self, _ctx: &Arc<OperationContext>, _payload: &PayloadOperation) {
            panic!("kaboom");
        }
    }

    #[test]
    fn test_extension_panic_becomes_attributed_error() {
        let schema = test_schema();
        let ctx = operation_ctx();
        let extensions: Vec<Arc<dyn Extension>> = vec![Arc::new(PanickingExtension)];
        let err = parse_operation(
            &schema,
            &extensions,
            &ctx,
            &operation_payload("query { getFoo }"),
        )
        .expect_err("extension panicked");
        match err {
            Error::Result(result) => {
                assert_eq!(result.result.errors.len(), 1);
                assert_eq!(result.result.errors[0].message, "chaos.init: kaboom");
            }
            other => panic!("expected result error, got {other}"),
        }
    }

    struct FinisherExtension {
        seen: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Extension for FinisherExtension {
        fn name(&self) -> &str {
            "observer"
        }

        fn parse_did_start(&self, _ctx: &Arc<OperationContext>) -> ParseFinisher {
            let seen = self.seen.clone();
            Box::new(move |error| {
                seen.lock()
                    .push(format!("parse:{}", error.map_or("ok", |e| e.message.as_str())));
            })
        }

        fn validation_did_start(&self, _ctx: &Arc<OperationContext>) -> ValidationFinisher {
            let seen = self.seen.clone();
            Box::new(move |errors| {
                seen.lock().push(format!("validation:{}", errors.len()));
            })
        }
    }

    #[test]
    fn test_finishers_observe_outcomes() {
        let schema = test_schema();
        let ctx = operation_ctx();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let extensions: Vec<Arc<dyn Extension>> = vec![Arc::new(FinisherExtension {
            seen: seen.clone(),
        })];

        parse_operation(
            &schema,
            &extensions,
            &ctx,
            &operation_payload("query { getFoo }"),
        )
        .expect("query parses");

        let seen = seen.lock();
        assert_eq!(seen.as_slice(), ["parse:ok", "validation:0"]);
    }
}
