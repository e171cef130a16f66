//! Rendering values as source text
//!
//! `mold` produces text the loader can read back where that makes sense;
//! `form` is the human-facing variant (`print` uses it).

use ren_core::kind::TS_HIDDEN;
use ren_core::{Cell, Heap, Keysource, Kind, NodeId, ParamClass, Payload, Subclass};
use std::fmt::Write;

/// Nested arrays deeper than this are shown as `...`.
const MAX_MOLD_DEPTH: usize = 64;

pub fn mold(heap: &Heap, cell: &Cell) -> String {
    let mut out = String::new();
    mold_into(heap, cell, &mut out, 0);
    out
}

pub fn form(heap: &Heap, cell: &Cell) -> String {
    if cell.is_quoted() {
        return mold(heap, cell);
    }
    match cell.raw_kind() {
        Kind::Text | Kind::Tag => series_text(heap, cell).to_string(),
        Kind::Char => cell.as_char().map(String::from).unwrap_or_default(),
        Kind::Void => String::new(),
        Kind::Block | Kind::Group => {
            let items: Vec<String> = array_items(heap, cell)
                .iter()
                .map(|c| form(heap, c))
                .collect();
            items.join(" ")
        }
        _ => mold(heap, cell),
    }
}

fn series_text<'h>(heap: &'h Heap, cell: &Cell) -> &'h str {
    match cell.series_at() {
        Some((node, index)) => heap.text(node).get(index..).unwrap_or(""),
        None => "",
    }
}

fn array_items(heap: &Heap, cell: &Cell) -> Vec<Cell> {
    match cell.series_at() {
        Some((node, index)) => heap.cells(node).get(index..).unwrap_or_default().to_vec(),
        None => Vec::new(),
    }
}

fn spelling(heap: &Heap, cell: &Cell) -> String {
    cell.word_spelling()
        .map_or_else(String::new, |s| heap.spelling(s).to_string())
}

fn mold_into(heap: &Heap, cell: &Cell, out: &mut String, depth: usize) {
    if cell.is_quoted() {
        let levels = heap.quote_depth(cell) as usize;
        out.push_str(&"'".repeat(levels));
        let inner = heap.dequoted(cell);
        mold_into(heap, &inner, out, depth);
        return;
    }

    match cell.payload() {
        Payload::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        Payload::Decimal(d) => {
            if d.fract() == 0.0 && d.is_finite() {
                let _ = write!(out, "{d:.1}");
            } else {
                let _ = write!(out, "{d}");
            }
        }
        Payload::Logic(b) => out.push_str(if b { "true" } else { "false" }),
        Payload::Char(c) => mold_char(c, out),
        Payload::Datatype(k) => {
            let _ = write!(out, "{k}");
        }
        Payload::Typeset(bits) if cell.raw_kind() == Kind::Typeset => {
            out.push_str("make typeset! [");
            let names: Vec<String> = crate::typeset::kinds_of(bits)
                .iter()
                .map(ToString::to_string)
                .collect();
            out.push_str(&names.join(" "));
            out.push(']');
        }
        Payload::Typeset(_) => {
            let _ = write!(out, "#[{}]", cell.raw_kind().name());
        }
        Payload::Word { .. } => mold_word(heap, cell, out),
        Payload::Series { .. } => mold_series(heap, cell, out, depth),
        Payload::Context { varlist, .. } => mold_context(heap, cell.raw_kind(), varlist, out, depth),
        Payload::Action { paramlist, .. } => mold_action(heap, paramlist, out),
        Payload::Map(pairlist) => {
            out.push_str("make map! [");
            let items: Vec<String> = heap
                .cells(pairlist)
                .iter()
                .map(|c| mold_nested(heap, c, depth))
                .collect();
            out.push_str(&items.join(" "));
            out.push(']');
        }
        Payload::Pair(node) => {
            let cells = heap.cells(node);
            let x = cells.first().map(|c| mold(heap, c)).unwrap_or_default();
            let y = cells.get(1).map(|c| mold(heap, c)).unwrap_or_default();
            let _ = write!(out, "{x}x{y}");
        }
        Payload::Varargs { .. } => out.push_str("#[varargs!]"),
        Payload::Handle(h) => {
            let _ = write!(out, "#[handle! {h:#x}]");
        }
        Payload::Quoted { .. } => out.push_str("#[quoted!]"),
        Payload::None => match cell.raw_kind() {
            Kind::Blank => out.push('_'),
            Kind::Bar => out.push('|'),
            Kind::Void => out.push_str("#[void]"),
            Kind::End => out.push_str("#[end]"),
            other => {
                let _ = write!(out, "#[{other}]");
            }
        },
    }
}

fn mold_nested(heap: &Heap, cell: &Cell, depth: usize) -> String {
    let mut s = String::new();
    mold_into(heap, cell, &mut s, depth + 1);
    s
}

fn mold_char(c: char, out: &mut String) {
    out.push_str("#\"");
    match c {
        '"' => out.push_str("^\""),
        '^' => out.push_str("^^"),
        '\n' => out.push_str("^/"),
        '\t' => out.push_str("^-"),
        c => out.push(c),
    }
    out.push('"');
}

fn mold_word(heap: &Heap, cell: &Cell, out: &mut String) {
    let name = spelling(heap, cell);
    match cell.raw_kind() {
        Kind::SetWord => {
            let _ = write!(out, "{name}:");
        }
        Kind::GetWord => {
            let _ = write!(out, ":{name}");
        }
        Kind::Refinement => {
            let _ = write!(out, "/{name}");
        }
        Kind::Issue => {
            let _ = write!(out, "#{name}");
        }
        _ => out.push_str(&name),
    }
}

fn mold_series(heap: &Heap, cell: &Cell, out: &mut String, depth: usize) {
    let kind = cell.raw_kind();
    match kind {
        Kind::Text => {
            out.push('"');
            for c in series_text(heap, cell).chars() {
                match c {
                    '"' => out.push_str("^\""),
                    '^' => out.push_str("^^"),
                    '\n' => out.push_str("^/"),
                    '\t' => out.push_str("^-"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        Kind::Tag => {
            let _ = write!(out, "<{}>", series_text(heap, cell));
        }
        Kind::Binary => {
            out.push_str("#{");
            if let Some((node, index)) = cell.series_at() {
                for b in heap.bytes(node).get(index..).unwrap_or_default() {
                    let _ = write!(out, "{b:02X}");
                }
            }
            out.push('}');
        }
        Kind::Path | Kind::SetPath | Kind::GetPath => {
            if kind == Kind::GetPath {
                out.push(':');
            }
            let parts: Vec<String> = array_items(heap, cell)
                .iter()
                .map(|c| mold_nested(heap, c, depth))
                .collect();
            out.push_str(&parts.join("/"));
            if kind == Kind::SetPath {
                out.push(':');
            }
        }
        _ => {
            let (open, close) = if kind == Kind::Group { ('(', ')') } else { ('[', ']') };
            out.push(open);
            if depth >= MAX_MOLD_DEPTH {
                out.push_str("...");
            } else {
                let parts: Vec<String> = array_items(heap, cell)
                    .iter()
                    .map(|c| mold_nested(heap, c, depth))
                    .collect();
                out.push_str(&parts.join(" "));
            }
            out.push(close);
        }
    }
}

/// Keys of a varlist without consulting the evaluator.
fn varlist_keys(heap: &Heap, varlist: NodeId) -> Option<NodeId> {
    match heap.subclass(varlist) {
        Subclass::Varlist {
            keysource: Keysource::Keylist(keys),
            ..
        } => Some(keys),
        Subclass::Varlist {
            keysource: Keysource::Frame(serial),
            ..
        } => heap
            .frame_index(serial)
            .and_then(|fi| heap.frames[fi].action.as_ref())
            .map(|a| a.original),
        _ => None,
    }
}

fn mold_context(heap: &Heap, kind: Kind, varlist: NodeId, out: &mut String, depth: usize) {
    let _ = write!(out, "make {kind} [");
    if !heap.is_accessible(varlist) {
        out.push_str("...]");
        return;
    }
    if depth >= MAX_MOLD_DEPTH {
        out.push_str("...]");
        return;
    }
    let Some(keys) = varlist_keys(heap, varlist) else {
        out.push(']');
        return;
    };
    let mut parts = Vec::new();
    let key_cells = heap.cells(keys);
    for (i, value) in heap.cells(varlist).iter().enumerate().skip(1) {
        let Some(key) = key_cells.get(i) else { break };
        let hidden = key.typeset_bits().is_some_and(|b| b & TS_HIDDEN != 0);
        let internal = matches!(
            key.param_class(),
            Some(ParamClass::Local | ParamClass::Return | ParamClass::Leave)
        );
        if hidden || internal {
            continue;
        }
        let name = key.key_spelling().map_or("?", |s| heap.spelling(s));
        parts.push(format!("{name}: {}", mold_nested(heap, value, depth)));
    }
    out.push_str(&parts.join(" "));
    out.push(']');
}

fn mold_action(heap: &Heap, paramlist: NodeId, out: &mut String) {
    out.push_str("#[action! [");
    let mut parts = Vec::new();
    for param in heap.cells(paramlist).iter().skip(1) {
        let bits = param.typeset_bits().unwrap_or(0);
        if bits & TS_HIDDEN != 0 {
            continue;
        }
        let name = param.key_spelling().map_or("?", |s| heap.spelling(s));
        let shown = match param.param_class() {
            Some(ParamClass::Normal) => name.to_string(),
            Some(ParamClass::Tight) => format!("#{name}"),
            Some(ParamClass::HardQuote) => format!(":{name}"),
            Some(ParamClass::SoftQuote) => format!("'{name}"),
            Some(ParamClass::Refinement) => format!("/{name}"),
            _ => continue,
        };
        parts.push(shown);
    }
    out.push_str(&parts.join(" "));
    out.push_str("]]");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mold_scalars() {
        let heap = Heap::default();
        assert_eq!(mold(&heap, &Cell::integer(-7)), "-7");
        assert_eq!(mold(&heap, &Cell::decimal(2.0)), "2.0");
        assert_eq!(mold(&heap, &Cell::decimal(0.5)), "0.5");
        assert_eq!(mold(&heap, &Cell::blank()), "_");
        assert_eq!(mold(&heap, &Cell::logic(true)), "true");
        assert_eq!(mold(&heap, &Cell::char('"')), "#\"^\"\"");
        assert_eq!(mold(&heap, &Cell::datatype(Kind::Integer)), "integer!");
    }

    #[test]
    fn test_mold_words_and_quotes() {
        let mut heap = Heap::default();
        let s = heap.intern("foo");
        assert_eq!(mold(&heap, &Cell::any_word(Kind::SetWord, s)), "foo:");
        assert_eq!(mold(&heap, &Cell::any_word(Kind::Refinement, s)), "/foo");
        let quoted = heap.quotify(Cell::word(s), 5);
        assert_eq!(mold(&heap, &quoted), "'''''foo");
    }

    #[test]
    fn test_mold_and_form_text_and_blocks() {
        let mut heap = Heap::default();
        let text = heap.make_string("say \"hi\"");
        let block = heap.make_managed_array(
            Subclass::Array,
            vec![Cell::integer(1), Cell::text(text)],
        );
        assert_eq!(mold(&heap, &Cell::block(block)), "[1 \"say ^\"hi^\"\"]");
        assert_eq!(form(&heap, &Cell::block(block)), "1 say \"hi\"");
    }

    #[test]
    fn test_deep_nesting_is_cut_off() {
        let mut heap = Heap::default();
        let mut inner = heap.make_managed_array(Subclass::Array, vec![]);
        for _ in 0..(MAX_MOLD_DEPTH + 10) {
            inner = heap.make_managed_array(Subclass::Array, vec![Cell::block(inner)]);
        }
        let text = mold(&heap, &Cell::block(inner));
        assert!(text.contains("..."));
    }
}
