//! Evaluation of the style expressions used by the bundled overlays.
//!
//! Only the subset the sea route layers rely on is understood: property
//! lookups, `coalesce`, equality, arithmetic, zoom `interpolate`/`step` and
//! `format`. Unknown operators evaluate to `null`.

use serde_json::{Map, Number, Value};

/// Inputs an expression may read.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub zoom: f64,
    pub properties: &'a Map<String, Value>,
}

impl<'a> EvalContext<'a> {
    pub fn new(zoom: f64, properties: &'a Map<String, Value>) -> Self {
        Self { zoom, properties }
    }
}

/// Evaluate `expr` to a JSON value.
pub fn evaluate(expr: &Value, ctx: &EvalContext<'_>) -> Value {
    let Value::Array(items) = expr else {
        return expr.clone();
    };
    let Some(Value::String(op)) = items.first() else {
        // Plain arrays (dash patterns, offsets) are literal values.
        return expr.clone();
    };
    let args = &items[1..];

    match op.as_str() {
        "literal" => args.first().cloned().unwrap_or(Value::Null),
        "get" => args
            .first()
            .and_then(Value::as_str)
            .and_then(|key| ctx.properties.get(key))
            .cloned()
            .unwrap_or(Value::Null),
        "has" => Value::Bool(
            args.first()
                .and_then(Value::as_str)
                .is_some_and(|key| ctx.properties.contains_key(key)),
        ),
        "zoom" => number(ctx.zoom),
        "coalesce" => args
            .iter()
            .map(|a| evaluate(a, ctx))
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        "==" | "!=" => {
            let (Some(lhs), Some(rhs)) = (args.first(), args.get(1)) else {
                return Value::Null;
            };
            let equal = values_equal(&evaluate(lhs, ctx), &evaluate(rhs, ctx));
            Value::Bool(if op == "==" { equal } else { !equal })
        }
        "!" => Value::Bool(!truthy(&args.first().map(|a| evaluate(a, ctx)).unwrap_or_default())),
        "all" => Value::Bool(args.iter().all(|a| truthy(&evaluate(a, ctx)))),
        "any" => Value::Bool(args.iter().any(|a| truthy(&evaluate(a, ctx)))),
        "*" => fold_numbers(args, ctx, 1.0, |acc, n| acc * n),
        "+" => fold_numbers(args, ctx, 0.0, |acc, n| acc + n),
        "-" => match args {
            [only] => evaluate_number(only, ctx).map(|n| number(-n)).unwrap_or_default(),
            [lhs, rhs] => match (evaluate_number(lhs, ctx), evaluate_number(rhs, ctx)) {
                (Some(a), Some(b)) => number(a - b),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        "interpolate" => interpolate(args, ctx),
        "step" => step(args, ctx),
        "concat" => Value::String(args.iter().map(|a| to_text(&evaluate(a, ctx))).collect()),
        "format" => {
            // Sections alternate between content and an options object.
            let text: String = args
                .iter()
                .filter(|a| !a.is_object())
                .map(|a| to_text(&evaluate(a, ctx)))
                .collect();
            Value::String(text)
        }
        "to-string" => Value::String(
            args.first()
                .map(|a| to_text(&evaluate(a, ctx)))
                .unwrap_or_default(),
        ),
        other => {
            tracing::trace!(operator = other, "unsupported style expression");
            Value::Null
        }
    }
}

/// Evaluate a layer filter; an absent filter matches everything.
pub fn evaluate_filter(filter: Option<&Value>, ctx: &EvalContext<'_>) -> bool {
    filter.is_none_or(|f| truthy(&evaluate(f, ctx)))
}

pub fn evaluate_number(expr: &Value, ctx: &EvalContext<'_>) -> Option<f64> {
    evaluate(expr, ctx).as_f64()
}

pub fn evaluate_text(expr: &Value, ctx: &EvalContext<'_>) -> Option<String> {
    match evaluate(expr, ctx) {
        Value::Null => None,
        v => Some(to_text(&v)).filter(|s| !s.is_empty()),
    }
}

fn number(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        _ => true,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn to_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn fold_numbers(
    args: &[Value],
    ctx: &EvalContext<'_>,
    init: f64,
    f: impl Fn(f64, f64) -> f64,
) -> Value {
    let mut acc = init;
    for arg in args {
        match evaluate_number(arg, ctx) {
            Some(n) => acc = f(acc, n),
            None => return Value::Null,
        }
    }
    number(acc)
}

/// `["interpolate", ["linear"] | ["exponential", base], input, z0, v0, z1, v1, ...]`
fn interpolate(args: &[Value], ctx: &EvalContext<'_>) -> Value {
    let (Some(kind), Some(input)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    let base = match kind.get(0).and_then(Value::as_str) {
        Some("exponential") => kind.get(1).and_then(Value::as_f64).unwrap_or(1.0),
        _ => 1.0,
    };
    let Some(x) = evaluate_number(input, ctx) else {
        return Value::Null;
    };

    let stops: Vec<(f64, &Value)> = args[2..]
        .chunks_exact(2)
        .filter_map(|pair| pair[0].as_f64().map(|z| (z, &pair[1])))
        .collect();
    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return Value::Null;
    };
    if x <= first.0 {
        return evaluate(first.1, ctx);
    }
    if x >= last.0 {
        return evaluate(last.1, ctx);
    }

    for window in stops.windows(2) {
        let (z0, v0) = window[0];
        let (z1, v1) = window[1];
        if x >= z0 && x <= z1 {
            let t = interpolation_factor(x, z0, z1, base);
            return match (evaluate_number(v0, ctx), evaluate_number(v1, ctx)) {
                (Some(a), Some(b)) => number(a + (b - a) * t),
                _ => evaluate(v0, ctx),
            };
        }
    }
    Value::Null
}

fn interpolation_factor(x: f64, lower: f64, upper: f64, base: f64) -> f64 {
    let span = upper - lower;
    if span <= 0.0 {
        return 0.0;
    }
    let progress = x - lower;
    if (base - 1.0).abs() < f64::EPSILON {
        progress / span
    } else {
        (base.powf(progress) - 1.0) / (base.powf(span) - 1.0)
    }
}

/// `["step", input, default, z1, v1, z2, v2, ...]`
fn step(args: &[Value], ctx: &EvalContext<'_>) -> Value {
    let (Some(input), Some(default)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    let Some(x) = evaluate_number(input, ctx) else {
        return Value::Null;
    };
    let mut output = default;
    for pair in args[2..].chunks_exact(2) {
        match pair[0].as_f64() {
            Some(stop) if x >= stop => output = &pair[1],
            _ => break,
        }
    }
    evaluate(output, ctx)
}
