//! Building a paramlist from a spec block
//!
//! A spec is a block such as:
//!
//! ```text
//! [
//!     "Description of the action"
//!     value [integer! text!] "note for value"
//!     :quoted             ; hard quote
//!     'soft               ; soft quote
//!     #tight              ; no lookahead
//!     /refine extra       ; refinement and its argument
//!     temp:               ; local
//!     return: [integer!] "note for the result"
//!     <local> more locals
//!     <with> outer-names  ; documented, not declared
//! ]
//! ```
//!
//! The result is a fixed-size paramlist whose `[0]` is filled in later with
//! the archetype action. A definitional return or leave always ends up in
//! the last slot.
//!
//! Meta information (description, notes, type blocks) is only kept when
//! the spec has some; undocumented actions carry no meta object.

use crate::error::{Condition, ErrorId};
use crate::interp::Interpreter;
use ren_core::kind::{TS_ALL_KINDS, TS_DEFAULT_PARAM};
use ren_core::{ActionFlags, Binding, Cell, Keysource, Kind, NodeFlags, NodeId, ParamClass, Subclass};
use std::collections::HashSet;

/// Which definitional exit the action gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Definitional {
    #[default]
    None,
    Return,
    Leave,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecOptions {
    pub definitional: Definitional,
    /// Read the `return:` typeset (for invisibility) but keep no slot.
    pub fake_return: bool,
    /// Accept `<local>` and `<with>`.
    pub keywords: bool,
    /// Parameters without a type block accept anything, void included.
    pub any_value: bool,
}

impl SpecOptions {
    pub const fn func() -> Self {
        SpecOptions {
            definitional: Definitional::Return,
            fake_return: false,
            keywords: true,
            any_value: false,
        }
    }

    pub const fn proc() -> Self {
        SpecOptions {
            definitional: Definitional::Leave,
            ..SpecOptions::func()
        }
    }

    pub const fn native() -> Self {
        SpecOptions {
            definitional: Definitional::Return,
            fake_return: true,
            keywords: true,
            any_value: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Local,
    With,
}

#[derive(Debug)]
struct SpecParam {
    class: ParamClass,
    spelling: NodeId,
    bits: Option<u64>,
    /// The type block as written, for meta.
    types: Option<Vec<Cell>>,
    note: Option<String>,
}

impl Interpreter {
    /// Build a paramlist from `spec` (a block cell). Returns the paramlist
    /// with its action flags set but its archetype still blank.
    pub fn build_paramlist(&mut self, spec: &Cell, options: SpecOptions) -> Result<NodeId, Condition> {
        let items: Vec<Cell> = match spec.series_at() {
            Some((node, index)) => self.heap.cells(node).get(index..).unwrap_or_default().to_vec(),
            None => {
                return Err(Condition::new(
                    ErrorId::BadFuncDef,
                    [crate::mold::mold(&self.heap, spec)],
                ));
            }
        };
        let bad = |me: &Self, item: &Cell| {
            Condition::new(ErrorId::BadFuncDef, [crate::mold::mold(&me.heap, item)])
        };

        let mut definitional = options.definitional;
        let mut fake_return = options.fake_return;
        let mut mode = Mode::Normal;
        let mut refinement_seen = false;
        let mut description: Option<String> = None;
        let mut params: Vec<SpecParam> = Vec::new();

        for item in &items {
            let kind = item.raw_kind();

            if item.is_quoted() {
                // 'word is a soft-quoted parameter; nothing else may be quoted.
                let inner = self.heap.dequoted(item);
                if self.heap.quote_depth(item) != 1 || inner.raw_kind() != Kind::Word {
                    return Err(bad(self, item));
                }
                if mode == Mode::With {
                    continue;
                }
                if mode == Mode::Local {
                    return Err(bad(self, item));
                }
                let spelling = inner.word_spelling().ok_or_else(|| bad(self, item))?;
                params.push(SpecParam {
                    class: ParamClass::SoftQuote,
                    spelling,
                    bits: None,
                    types: None,
                    note: None,
                });
                continue;
            }

            match kind {
                Kind::Text => {
                    let text = self.series_text(item);
                    match (params.last_mut(), mode) {
                        (None, Mode::Normal) => description = Some(text),
                        (Some(param), Mode::Normal) => param.note = Some(text),
                        _ => {}
                    }
                }

                Kind::Tag => {
                    if !options.keywords {
                        return Err(bad(self, item));
                    }
                    mode = match self.series_text(item).as_str() {
                        "local" => Mode::Local,
                        "with" => Mode::With,
                        _ => return Err(bad(self, item)),
                    };
                }

                Kind::Block => {
                    if mode != Mode::Normal {
                        return Err(bad(self, item));
                    }
                    let Some(last) = params.last() else {
                        return Err(bad(self, item));
                    };
                    if last.types.is_some()
                        || last.class == ParamClass::Refinement
                    {
                        return Err(bad(self, item));
                    }
                    let class = last.class;
                    let spelling = last.spelling;
                    let types: Vec<Cell> = item
                        .series_at()
                        .map(|(n, i)| self.heap.cells(n).get(i..).unwrap_or_default().to_vec())
                        .unwrap_or_default();
                    let bits = self.make_typeset(&types, Some(class))?;
                    if refinement_seen
                        && class.takes_argument()
                        && bits & Kind::Void.bit() != 0
                    {
                        return Err(Condition::new(
                            ErrorId::RefinementArgOpt,
                            [self.heap.spelling(spelling).to_string()],
                        ));
                    }
                    if let Some(last) = params.last_mut() {
                        last.bits = Some(bits);
                        last.types = Some(types);
                    }
                }

                k if k.is_any_word() => {
                    let Some(spelling) = item.word_spelling() else {
                        return Err(bad(self, item));
                    };
                    if k == Kind::Refinement {
                        mode = Mode::Normal;
                    }

                    let canon = self.heap.canon(spelling);
                    let is_return = canon == self.syms.return_;
                    let is_leave = canon == self.syms.leave;

                    // `<local> return` and `<with> return` opt out of the
                    // definitional exit like a plain `return` parameter.
                    if mode != Mode::Normal && matches!(k, Kind::Word | Kind::SetWord) {
                        if is_return && definitional == Definitional::Return {
                            definitional = Definitional::None;
                            fake_return = false;
                        } else if is_leave && definitional == Definitional::Leave {
                            definitional = Definitional::None;
                        }
                    }
                    if mode == Mode::With {
                        continue;
                    }
                    if mode == Mode::Local {
                        match k {
                            Kind::Word | Kind::SetWord => {
                                params.push(SpecParam {
                                    class: ParamClass::Local,
                                    spelling,
                                    bits: None,
                                    types: None,
                                    note: None,
                                });
                                continue;
                            }
                            _ => return Err(bad(self, item)),
                        }
                    }

                    let class = match k {
                        Kind::Word => {
                            // A plain `return` or `leave` parameter opts out
                            // of the definitional one.
                            if is_return && definitional == Definitional::Return {
                                definitional = Definitional::None;
                                fake_return = false;
                            } else if is_leave && definitional == Definitional::Leave {
                                definitional = Definitional::None;
                            }
                            ParamClass::Normal
                        }
                        Kind::GetWord => ParamClass::HardQuote,
                        Kind::Issue => ParamClass::Tight,
                        Kind::Refinement => {
                            refinement_seen = true;
                            ParamClass::Refinement
                        }
                        Kind::SetWord => {
                            if is_return && definitional == Definitional::Return {
                                ParamClass::Return
                            } else if is_leave && definitional == Definitional::Leave {
                                ParamClass::Leave
                            } else {
                                ParamClass::Local
                            }
                        }
                        _ => return Err(bad(self, item)),
                    };
                    params.push(SpecParam {
                        class,
                        spelling,
                        bits: None,
                        types: None,
                        note: None,
                    });
                }

                _ => return Err(bad(self, item)),
            }
        }

        // Definitional exits: find the explicit slot, or add one, and move
        // it last. A fake return keeps its typeset but no slot.
        let mut invisible = false;
        let mut fake_slot: Option<SpecParam> = None;
        match definitional {
            Definitional::Return => {
                let explicit = params.iter().position(|p| p.class == ParamClass::Return);
                let slot = match explicit {
                    Some(i) => params.remove(i),
                    None => {
                        let documented = description.is_some()
                            || params.iter().any(|p| p.types.is_some() || p.note.is_some());
                        let bits = if options.any_value || !documented {
                            TS_ALL_KINDS
                        } else {
                            TS_DEFAULT_PARAM
                        };
                        SpecParam {
                            class: ParamClass::Return,
                            spelling: self.syms.return_,
                            bits: Some(bits),
                            types: None,
                            note: None,
                        }
                    }
                };
                if slot.bits == Some(0) {
                    invisible = true;
                }
                if fake_return {
                    fake_slot = Some(slot);
                } else {
                    params.push(slot);
                }
            }
            Definitional::Leave => {
                let explicit = params.iter().position(|p| p.class == ParamClass::Leave);
                let mut slot = match explicit {
                    Some(i) => params.remove(i),
                    None => SpecParam {
                        class: ParamClass::Leave,
                        spelling: self.syms.leave,
                        bits: None,
                        types: None,
                        note: None,
                    },
                };
                slot.bits = Some(Kind::Void.bit());
                params.push(slot);
            }
            Definitional::None => {}
        }

        // Duplicates by canon.
        let mut seen = HashSet::new();
        for p in &params {
            if !seen.insert(self.heap.canon(p.spelling)) {
                return Err(Condition::new(
                    ErrorId::DupVars,
                    [self.heap.spelling(p.spelling).to_string()],
                ));
            }
        }

        let default_bits = if options.any_value {
            TS_ALL_KINDS
        } else {
            TS_DEFAULT_PARAM
        };
        let mut cells = Vec::with_capacity(params.len() + 1);
        cells.push(Cell::blank());
        for p in &params {
            let bits = match p.class {
                ParamClass::Refinement => Kind::Logic.bit() | Kind::Void.bit(),
                ParamClass::Local => TS_ALL_KINDS,
                _ => p.bits.unwrap_or(default_bits),
            };
            cells.push(Cell::param(p.class, bits, p.spelling));
        }

        let mut flags = ActionFlags::empty();
        if params.iter().any(|p| p.class == ParamClass::Return) {
            flags.insert(ActionFlags::RETURN);
        }
        if params.iter().any(|p| p.class == ParamClass::Leave) {
            flags.insert(ActionFlags::LEAVE);
        }
        if invisible {
            flags.insert(ActionFlags::INVISIBLE);
        }

        let paramlist = self
            .heap
            .make_managed_array(Subclass::Array, cells);
        self.heap
            .node_mut(paramlist)
            .flags
            .insert(NodeFlags::FIXED_SIZE);
        self.heap.set_subclass(
            paramlist,
            Subclass::Paramlist {
                underlying: paramlist,
                facade: paramlist,
                meta: None,
                flags,
            },
        );

        let documented = description.is_some()
            || params
                .iter()
                .chain(fake_slot.as_ref())
                .any(|p| p.types.is_some() || p.note.is_some());
        if documented {
            let meta = self.make_meta(paramlist, description, &params, fake_slot.as_ref())?;
            if let Subclass::Paramlist {
                underlying,
                facade,
                flags,
                ..
            } = self.heap.subclass(paramlist)
            {
                self.heap.set_subclass(
                    paramlist,
                    Subclass::Paramlist {
                        underlying,
                        facade,
                        meta: Some(meta),
                        flags,
                    },
                );
            }
        }

        tracing::trace!(params = params.len(), documented, "built paramlist");
        Ok(paramlist)
    }

    /// Meta object for a documented spec. Per-parameter types and notes are
    /// FRAME!-shaped varlists keyed by the paramlist itself.
    fn make_meta(
        &mut self,
        paramlist: NodeId,
        description: Option<String>,
        params: &[SpecParam],
        fake_return: Option<&SpecParam>,
    ) -> Result<NodeId, Condition> {
        let meta = self.make_context(Kind::Object, self.meta_keys);
        self.heap.push_guard_node(meta);
        let result = self.fill_meta(meta, paramlist, description, params, fake_return);
        self.heap.drop_guard();
        result.map(|()| meta)
    }

    fn fill_meta(
        &mut self,
        meta: NodeId,
        paramlist: NodeId,
        description: Option<String>,
        params: &[SpecParam],
        fake_return: Option<&SpecParam>,
    ) -> Result<(), Condition> {
        if let Some(text) = description {
            let node = self.heap.make_string(&text);
            self.heap.set_cell(meta, META_DESCRIPTION, Cell::text(node))?;
        }

        let returns = params
            .iter()
            .find(|p| p.class == ParamClass::Return)
            .or(fake_return);
        if let Some(ret) = returns {
            if let Some(types) = &ret.types {
                let copy = self.heap.make_managed_array(Subclass::Array, types.clone());
                self.heap.set_cell(meta, META_RETURN_TYPE, Cell::block(copy))?;
            }
            if let Some(note) = &ret.note {
                let node = self.heap.make_string(note);
                self.heap.set_cell(meta, META_RETURN_NOTE, Cell::text(node))?;
            }
        }

        let any_types = params
            .iter()
            .any(|p| p.class != ParamClass::Return && p.types.is_some());
        let any_notes = params
            .iter()
            .any(|p| p.class != ParamClass::Return && p.note.is_some());
        let types_frame = any_types.then(|| self.make_param_frame(paramlist));
        let notes_frame = any_notes.then(|| self.make_param_frame(paramlist));

        for (i, p) in params.iter().enumerate() {
            if p.class == ParamClass::Return {
                continue;
            }
            let slot = i + 1;
            if let (Some(frame), Some(types)) = (types_frame, &p.types) {
                let copy = self.heap.make_managed_array(Subclass::Array, types.clone());
                self.heap.set_cell(frame, slot, Cell::block(copy))?;
            }
            if let (Some(frame), Some(note)) = (notes_frame, &p.note) {
                let node = self.heap.make_string(note);
                self.heap.set_cell(frame, slot, Cell::text(node))?;
            }
        }

        if let Some(frame) = types_frame {
            let cell = self.heap.cell_at(frame, 0).unwrap_or_else(Cell::void);
            self.heap.set_cell(meta, META_PARAMETER_TYPES, cell)?;
        }
        if let Some(frame) = notes_frame {
            let cell = self.heap.cell_at(frame, 0).unwrap_or_else(Cell::void);
            self.heap.set_cell(meta, META_PARAMETER_NOTES, cell)?;
        }
        Ok(())
    }

    fn make_param_frame(&mut self, paramlist: NodeId) -> NodeId {
        let count = self.heap.len(paramlist) - 1;
        let varlist = self.heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Keylist(paramlist),
                meta: None,
            },
            Vec::with_capacity(count + 1),
        );
        if let Some(cells) = self.heap.node_mut(varlist).cells_mut() {
            cells.push(Cell::frame(varlist, paramlist, Binding::Unbound));
            cells.resize(count + 1, Cell::void());
        }
        varlist
    }

    /// Meta object of an action's paramlist, if it has one.
    pub fn paramlist_meta(&self, paramlist: NodeId) -> Option<NodeId> {
        match self.heap.subclass(paramlist) {
            Subclass::Paramlist { meta, .. } => meta,
            _ => None,
        }
    }
}

/// Field order of the meta keylist.
pub(crate) const META_FIELDS: [&str; 5] = [
    "description",
    "return-type",
    "return-note",
    "parameter-types",
    "parameter-notes",
];
const META_DESCRIPTION: usize = 1;
const META_RETURN_TYPE: usize = 2;
const META_RETURN_NOTE: usize = 3;
const META_PARAMETER_TYPES: usize = 4;
const META_PARAMETER_NOTES: usize = 5;
