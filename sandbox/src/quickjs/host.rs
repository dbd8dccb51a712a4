//! Capability globals for a QuickJS context.

use std::sync::Arc;

use gasvm_hostapi::TransferBuffer;
use rquickjs::convert::Coerced;
use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, Exception, Function, IntoJs, Object, Value};

use super::{throw_sites, Shared};
use crate::capability::{Bridge, BridgeError, HostValue, Method};

/// Install `storage`, `blockchain`, `crypto`, `instruction_counter`,
/// `console`, `_native_require` and `_native_throw_site` on the global
/// object. The prelude takes the two native hooks private.
pub(super) fn install<'js>(
    ctx: &Ctx<'js>,
    bridge: &Arc<Bridge>,
    shared: &Arc<Shared>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    for object in Method::objects() {
        let target = Object::new(ctx.clone())?;
        for method in Method::ALL.iter().copied().filter(|m| m.object() == object) {
            let bridge = bridge.clone();
            let shared = shared.clone();
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<HostValue> {
                    call(&ctx, &bridge, &shared, method, args.0)
                },
            )?;
            target.set(method.name(), func)?;
        }
        globals.set(object, target)?;
    }

    let counter = Object::new(ctx.clone())?;
    {
        let bridge = bridge.clone();
        let shared = shared.clone();
        counter.set(
            "incr",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<f64> {
                    let amount = match args.0.first().and_then(Value::as_number) {
                        Some(n) if args.0.len() == 1 => n,
                        _ => {
                            return Err(Exception::throw_type(
                                &ctx,
                                "instruction_counter.incr expects one number",
                            ))
                        }
                    };
                    let total = bridge.instructions().incr(amount);
                    shared.probe_if_due(bridge.governor());
                    total.map(|t| t as f64).map_err(|e| throw(&ctx, e))
                },
            )?,
        )?;
    }
    {
        let bridge = bridge.clone();
        counter.set(
            "count",
            Function::new(ctx.clone(), move || -> f64 {
                bridge.instructions().count() as f64
            })?,
        )?;
    }
    globals.set("instruction_counter", counter)?;

    let console = Object::new(ctx.clone())?;
    {
        let bridge = bridge.clone();
        console.set(
            "log",
            Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                let line = args
                    .0
                    .iter()
                    .map(|v| display(&ctx, v))
                    .collect::<Vec<_>>()
                    .join(" ");
                bridge.log(&line);
            })?,
        )?;
    }
    globals.set("console", console)?;

    let bridge = bridge.clone();
    globals.set(
        "_native_require",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<String> {
                let name = match args.0.first().and_then(Value::as_string) {
                    Some(name) => name.to_string()?,
                    None => return Err(Exception::throw_type(&ctx, "module name must be a string")),
                };
                let source = bridge.require(&name).map_err(|e| throw(&ctx, e))?;
                Ok(throw_sites::instrument(&source, Some(&format!("{}.js", name))))
            },
        )?,
    )?;

    let shared = shared.clone();
    globals.set(
        "_native_throw_site",
        Function::new(ctx.clone(), move |line: u32, module: Opt<String>| {
            shared.record_throw(line, module.0);
        })?,
    )?;

    Ok(())
}

/// Marshal, dispatch, and convert one capability call.
fn call<'js>(
    ctx: &Ctx<'js>,
    bridge: &Bridge,
    shared: &Shared,
    method: Method,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<HostValue> {
    let mut buffers = Vec::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        match arg.as_string() {
            Some(s) => buffers.push(TransferBuffer::from(s.to_string()?)),
            None => {
                return Err(Exception::throw_type(
                    ctx,
                    &format!(
                        "{}: argument {} must be a string, got {}",
                        method.qualified(),
                        index + 1,
                        type_name(arg)
                    ),
                ))
            }
        }
    }
    let outcome = bridge.dispatch(method, buffers);
    shared.probe_if_due(bridge.governor());
    outcome.map_err(|e| throw(ctx, e))
}

fn throw(ctx: &Ctx<'_>, error: BridgeError) -> rquickjs::Error {
    let message = error.to_string();
    if error.is_invalid_argument() {
        Exception::throw_type(ctx, &message)
    } else {
        Exception::throw_message(ctx, &message)
    }
}

fn type_name(value: &Value<'_>) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.is_bool() {
        "boolean"
    } else if value.is_number() {
        "number"
    } else if value.is_function() {
        "function"
    } else if value.is_array() {
        "array"
    } else if value.is_object() {
        "object"
    } else {
        "value"
    }
}

fn display<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_default();
    }
    if value.is_object() && !value.is_function() {
        if let Ok(Some(json)) = ctx.json_stringify(value.clone()) {
            if let Ok(text) = json.to_string() {
                return text;
            }
        }
    }
    value
        .get::<Coerced<String>>()
        .map(|Coerced(text)| text)
        .unwrap_or_else(|_| type_name(value).to_string())
}

impl<'js> IntoJs<'js> for HostValue {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        Ok(match self {
            HostValue::Unit => Value::new_undefined(ctx.clone()),
            HostValue::Null => Value::new_null(ctx.clone()),
            HostValue::Bool(b) => Value::new_bool(ctx.clone(), b),
            HostValue::Number(n) => Value::new_number(ctx.clone(), n as f64),
            HostValue::Str(buf) => buf.into_string_lossy().into_js(ctx)?,
        })
    }
}
