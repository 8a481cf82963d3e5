//! A compiled stand-in "peer" for `transrepl`'s integration tests —
//! playing the role `spec-peer`/`spec-subject` play for this codebase's own
//! conformance suite, but speaking a deliberately tiny expression language
//! instead of a real scripting language.
//!
//! Handshake constants below (`PROMPT`, `WRAP_PREFIX`, ...) must match the
//! `PeerProfile` the integration tests construct in `tests/common/mod.rs` —
//! there is no shared crate between a `[[bin]]` and the library's test
//! harness, so the two are kept in sync by hand.
//!
//! The language: integer/float/bool/string literals, `name` lookups,
//! `a + b` / `a - b` (one top-level operator per expression), `name(args)`
//! calls — to a locally `def`-ined peer function if one exists, otherwise
//! to a host export — and `raise("msg")` to simulate a peer-side
//! exception. `UNSERIALIZABLE` simulates a value the peer cannot encode.
//! `repl_depth()` returns this peer's current re-entrancy depth, so tests
//! can assert the balanced-depth invariant directly.
//! Statements (`eval_block`) are `;`-separated assignments (`x = expr`) and
//! definitions (`def name(a, b) = expr`).

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

use tracing_subscriber::EnvFilter;
use transrepl::codec::{decode_value, encode_value};
use transrepl::frame::{Frame, FrameCode};
use transrepl::{Encoding, Value};

const PROMPT: &str = ">>> ";
const WRAP_PREFIX: &str = "__TR_BOND";
const UNSERIALIZABLE_TOKEN: &str = "UNSERIALIZABLE";

#[derive(Clone)]
struct PeerFunc {
    params: Vec<String>,
    body: String,
}

enum EvalError {
    Undefined(String),
    Raised(String),
    Unserializable,
    HostCall(String),
}

struct PeerState {
    stdin: BufReader<Stdin>,
    stdout: Stdout,
    globals: HashMap<String, Value>,
    funcs: HashMap<String, PeerFunc>,
    trans_except: bool,
    encoding: Encoding,
}

impl PeerState {
    fn send_frame(&mut self, code: FrameCode, depth: u32, payload: Vec<u8>) {
        let line = Frame::new(code, depth, payload).encode();
        self.stdout
            .write_all(line.as_bytes())
            .expect("write to host stdin");
        self.stdout.flush().expect("flush to host stdin");
    }

    fn send_error(&mut self, depth: u32, message: &str) {
        let payload = if self.trans_except {
            encode_value(self.encoding, &Value::Str(message.to_string()))
                .unwrap_or_else(|_| message.as_bytes().to_vec())
        } else {
            message.as_bytes().to_vec()
        };
        self.send_frame(FrameCode::Error, depth, payload);
    }

    /// `EXCEPT` is always a plain UTF-8 detail string describing a
    /// serialization failure, never a structured exception value.
    fn send_except(&mut self, depth: u32, message: &str) {
        self.send_frame(FrameCode::Except, depth, message.as_bytes().to_vec());
    }

    fn recv_line(&mut self) -> Option<String> {
        let mut buf = String::new();
        let n = self.stdin.read_line(&mut buf).expect("read from host");
        if n == 0 {
            return None;
        }
        Some(buf.trim_end_matches(['\n', '\r']).to_string())
    }

    fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            let line = self.recv_line()?;
            if !Frame::looks_like_frame(&line) {
                continue;
            }
            match Frame::decode(&line) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed frame line, ignoring");
                    continue;
                }
            }
        }
    }
}

fn eval_error_to_frame(state: &mut PeerState, depth: u32, err: EvalError) {
    match err {
        EvalError::Raised(msg) => state.send_error(depth, &msg),
        EvalError::Unserializable => state.send_except(depth, "cannot serialize result"),
        EvalError::Undefined(name) => state.send_error(depth, &format!("undefined: {name}")),
        EvalError::HostCall(detail) => state.send_error(depth, &detail),
    }
}

fn send_eval_result(state: &mut PeerState, depth: u32, result: Result<Value, EvalError>) {
    match result {
        Ok(value) => match encode_value(state.encoding, &value) {
            Ok(payload) => state.send_frame(FrameCode::Return, depth, payload),
            Err(_) => state.send_except(depth, "cannot serialize result"),
        },
        Err(e) => eval_error_to_frame(state, depth, e),
    }
}

/// Send a `CALL` to the host for a name this peer has no local definition
/// for, then block until the matching `RETURN`/`EXCEPT`, serving any
/// `CALL`s the host makes back into this peer along the way.
fn request_host(
    state: &mut PeerState,
    name: &str,
    args: Vec<Value>,
    depth: u32,
) -> Result<Value, String> {
    let payload = encode_value(state.encoding, &(name, args)).map_err(|e| e.to_string())?;
    state.send_frame(FrameCode::Call, depth, payload);

    loop {
        let frame = state.recv_frame().ok_or("host closed connection")?;
        match frame.code {
            FrameCode::Return => {
                let value: Value =
                    decode_value(state.encoding, &frame.payload).map_err(|e| e.to_string())?;
                return Ok(value);
            }
            FrameCode::Except => {
                return Err(String::from_utf8_lossy(&frame.payload).into_owned());
            }
            FrameCode::Error => {
                let detail = if state.trans_except {
                    decode_value::<Value>(state.encoding, &frame.payload)
                        .map(|v| format!("{v:?}"))
                        .unwrap_or_else(|e| e.to_string())
                } else {
                    String::from_utf8_lossy(&frame.payload).into_owned()
                };
                return Err(detail);
            }
            FrameCode::Call => serve_call(state, &frame),
            FrameCode::Bye => return Err("host said BYE".to_string()),
            other => tracing::warn!(code = %other, "unexpected frame awaiting host reply"),
        }
    }
}

/// Serve one `CALL` the host sent for a peer-defined function, replying
/// with exactly one `RETURN`/`EXCEPT`/`ERROR` at the same depth.
fn serve_call(state: &mut PeerState, frame: &Frame) {
    let decoded: Result<(String, Vec<Value>), _> = decode_value(state.encoding, &frame.payload);
    let (name, args) = match decoded {
        Ok(v) => v,
        Err(e) => {
            state.send_except(frame.depth, &e.to_string());
            return;
        }
    };

    let Some(func) = state.funcs.get(&name).cloned() else {
        state.send_except(frame.depth, &format!("no peer function named '{name}'"));
        return;
    };

    let mut local_env = state.globals.clone();
    for (param, value) in func.params.iter().zip(args) {
        local_env.insert(param.clone(), value);
    }

    let result = eval_expr(state, &func.body, &local_env, frame.depth + 1);
    send_eval_result(state, frame.depth, result);
}

fn eval_expr(
    state: &mut PeerState,
    src: &str,
    env: &HashMap<String, Value>,
    depth: u32,
) -> Result<Value, EvalError> {
    let src = src.trim();

    if let Some((lhs, op, rhs)) = split_top_level_binop(src) {
        let left = eval_expr(state, lhs, env, depth)?;
        let right = eval_expr(state, rhs, env, depth)?;
        return apply_binop(op, left, right);
    }

    eval_primary(state, src, env, depth)
}

fn apply_binop(op: char, left: Value, right: Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if op == '+' { a + b } else { a - b })),
        (a, b) => {
            let af = as_f64(&a).ok_or_else(|| EvalError::Undefined(format!("{a:?}")))?;
            let bf = as_f64(&b).ok_or_else(|| EvalError::Undefined(format!("{b:?}")))?;
            Ok(Value::Float(if op == '+' { af + bf } else { af - bf }))
        }
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn eval_primary(
    state: &mut PeerState,
    src: &str,
    env: &HashMap<String, Value>,
    depth: u32,
) -> Result<Value, EvalError> {
    if src == UNSERIALIZABLE_TOKEN {
        return Err(EvalError::Unserializable);
    }
    if src == "true" {
        return Ok(Value::Bool(true));
    }
    if src == "false" {
        return Ok(Value::Bool(false));
    }
    if src.len() >= 2 && src.starts_with('"') && src.ends_with('"') {
        return Ok(Value::Str(src[1..src.len() - 1].to_string()));
    }
    if let Ok(i) = src.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = src.parse::<f64>() {
        return Ok(Value::Float(f));
    }

    if let (Some(open), true) = (src.find('('), src.ends_with(')')) {
        let name = src[..open].trim();
        let args_src = &src[open + 1..src.len() - 1];
        let args = split_top_level_commas(args_src)
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| eval_expr(state, a.trim(), env, depth))
            .collect::<Result<Vec<_>, _>>()?;

        if name == "raise" {
            let message = args
                .into_iter()
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            return Err(EvalError::Raised(message));
        }

        if name == "repl_depth" {
            return Ok(Value::Int(depth as i64));
        }

        if let Some(func) = state.funcs.get(name).cloned() {
            let mut local_env = state.globals.clone();
            for (param, value) in func.params.iter().zip(args) {
                local_env.insert(param.clone(), value);
            }
            return eval_expr(state, &func.body, &local_env, depth);
        }

        return request_host(state, name, args, depth).map_err(EvalError::HostCall);
    }

    env.get(src)
        .cloned()
        .ok_or_else(|| EvalError::Undefined(src.to_string()))
}

fn exec_block(state: &mut PeerState, src: &str, depth: u32) -> Result<(), EvalError> {
    for stmt in split_top_level(src, ';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        if let Some(rest) = stmt.strip_prefix("def ") {
            define_func(state, rest)?;
            continue;
        }
        if let Some(eq) = find_top_level_assign(stmt) {
            let name = stmt[..eq].trim().to_string();
            let expr = stmt[eq + 1..].trim();
            let env = state.globals.clone();
            let value = eval_expr(state, expr, &env, depth)?;
            state.globals.insert(name, value);
            continue;
        }
        let env = state.globals.clone();
        eval_expr(state, stmt, &env, depth)?;
    }
    Ok(())
}

fn define_func(state: &mut PeerState, rest: &str) -> Result<(), EvalError> {
    let bad = || EvalError::Undefined(format!("def {rest}"));
    let open = rest.find('(').ok_or_else(bad)?;
    let close = rest.find(')').ok_or_else(bad)?;
    let name = rest[..open].trim().to_string();
    let params: Vec<String> = split_top_level_commas(&rest[open + 1..close])
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let body = rest[close + 1..]
        .trim_start()
        .strip_prefix('=')
        .unwrap_or(&rest[close + 1..])
        .trim()
        .to_string();
    state.funcs.insert(name, PeerFunc { params, body });
    Ok(())
}

/// Split on `sep`, ignoring occurrences inside parens or quotes.
fn split_top_level(src: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in src.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            c if c == sep && !in_quote && depth == 0 => {
                parts.push(&src[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&src[start..]);
    parts
}

fn split_top_level_commas(src: &str) -> Vec<&str> {
    split_top_level(src, ',')
}

/// Find the byte offset of a top-level `=` that is not part of `==`.
fn find_top_level_assign(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b as char {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            '=' if !in_quote && depth == 0 => {
                let next_is_eq = bytes.get(i + 1) == Some(&b'=');
                let prev_is_eq = i > 0 && bytes[i - 1] == b'=';
                if !next_is_eq && !prev_is_eq {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `src` at the first top-level ` + ` or ` - `, outside parens and
/// quotes. Only one operator per expression is supported.
fn split_top_level_binop(src: &str) -> Option<(&str, char, &str)> {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    let mut in_quote = false;
    for i in 0..bytes.len() {
        match bytes[i] as char {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            c @ ('+' | '-')
                if !in_quote
                    && depth == 0
                    && i > 0
                    && i + 1 < bytes.len()
                    && bytes[i - 1] as char == ' '
                    && bytes[i + 1] as char == ' ' =>
            {
                return Some((src[..i - 1].trim(), c, src[i + 1..].trim()));
            }
            _ => {}
        }
    }
    None
}

fn parse_start_call(line: &str) -> Option<(bool, Encoding)> {
    let marker = format!("{WRAP_PREFIX}_start(");
    let start = line.find(&marker)?;
    let rest = &line[start + marker.len()..];
    let end = rest.find(')')?;
    let mut parts = rest[..end].splitn(2, ',');
    let trans_except: bool = parts.next()?.trim().parse().ok()?;
    let encoding_tok = parts.next()?.trim().trim_matches('"');
    encoding_tok.parse().ok().map(|enc| (trans_except, enc))
}

fn dispatch(state: &mut PeerState, frame: Frame) -> bool {
    match frame.code {
        FrameCode::Eval => {
            let decoded: Result<String, _> = decode_value(state.encoding, &frame.payload);
            match decoded {
                Ok(src) => {
                    let env = state.globals.clone();
                    let result = eval_expr(state, &src, &env, frame.depth + 1);
                    send_eval_result(state, frame.depth, result);
                }
                Err(e) => state.send_except(frame.depth, &e.to_string()),
            }
            true
        }
        FrameCode::EvalBlock => {
            let decoded: Result<String, _> = decode_value(state.encoding, &frame.payload);
            match decoded {
                Ok(src) => match exec_block(state, &src, frame.depth + 1) {
                    Ok(()) => {
                        let payload = encode_value(state.encoding, &Value::Null)
                            .expect("Value::Null always encodes");
                        state.send_frame(FrameCode::Return, frame.depth, payload);
                    }
                    Err(e) => eval_error_to_frame(state, frame.depth, e),
                },
                Err(e) => state.send_except(frame.depth, &e.to_string()),
            }
            true
        }
        FrameCode::Call => {
            serve_call(state, &frame);
            true
        }
        FrameCode::Export => {
            // Names are host-chosen and already validated; just ack so the
            // host's `Bond::export` call, which always awaits a reply, isn't
            // left hanging.
            let payload =
                encode_value(state.encoding, &Value::Null).expect("Value::Null always encodes");
            state.send_frame(FrameCode::Return, frame.depth, payload);
            true
        }
        FrameCode::Bye => false,
        FrameCode::Return | FrameCode::Except | FrameCode::Error => {
            tracing::warn!(code = %frame.code, "unexpected terminal frame at top level, ignoring");
            true
        }
        FrameCode::Output | FrameCode::Stderr => true,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    print!("mockpeer 0.1\n{PROMPT}");
    io::stdout().flush().expect("flush startup banner");

    let mut stdin = BufReader::new(io::stdin());

    let ready_needle = format!("{WRAP_PREFIX}_READY");
    loop {
        let mut line = String::new();
        if stdin.read_line(&mut line).expect("read handshake line") == 0 {
            return;
        }
        if line.contains(&ready_needle) {
            print!("\n{WRAP_PREFIX}_READY\n{PROMPT}");
            io::stdout().flush().expect("flush ready marker");
            break;
        }
    }

    let (trans_except, encoding) = loop {
        let mut line = String::new();
        if stdin.read_line(&mut line).expect("read start line") == 0 {
            return;
        }
        if let Some(parsed) = parse_start_call(line.trim()) {
            break parsed;
        }
    };

    let mut state = PeerState {
        stdin,
        stdout: io::stdout(),
        globals: HashMap::new(),
        funcs: HashMap::new(),
        trans_except,
        encoding,
    };

    // Untagged chatter on purpose: exercises the host's chatter-tolerance
    // path (spec §9) on every test run, not just a dedicated one.
    println!("mockpeer ready");
    state.stdout.flush().expect("flush readiness chatter");

    loop {
        let Some(frame) = state.recv_frame() else {
            break;
        };
        if !dispatch(&mut state, frame) {
            break;
        }
    }
}
