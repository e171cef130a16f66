//! Call-frame records
//!
//! A frame is one level of evaluation: where its input comes from, where its
//! result goes, and, when it is running an action, the argument cells
//! gathered so far. Frames live on the heap's frame stack, not in the node
//! pool; the collector walks them as roots.
//!
//! Arguments are kept in a plain vector while the call runs. Only when
//! something asks for the frame as a FRAME! value are they moved into a
//! varlist node (reification). After the call ends that varlist is marked
//! inaccessible.

use crate::cell::{Binding, Cell};
use crate::node::{FrameSerial, NodeId};
use std::fmt;
use std::iter::Peekable;

/// Cells produced by host code one at a time.
pub type VariadicSource = Peekable<Box<dyn Iterator<Item = Cell>>>;

/// Where a frame reads its input from.
pub enum FeedSource {
    /// Cells of an array node starting at `Feed::index`.
    Array(NodeId),
    /// Host-supplied cells not yet materialized into an array.
    Variadic(VariadicSource),
    Empty,
}

impl fmt::Debug for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Array(id) => write!(f, "Array({id})"),
            FeedSource::Variadic(_) => f.write_str("Variadic(..)"),
            FeedSource::Empty => f.write_str("Empty"),
        }
    }
}

#[derive(Debug)]
pub struct Feed {
    pub source: FeedSource,
    pub index: usize,
    /// Resolves relatively bound words read from the source.
    pub specifier: Binding,
}

impl Feed {
    pub fn array(array: NodeId, index: usize, specifier: Binding) -> Self {
        Feed {
            source: FeedSource::Array(array),
            index,
            specifier,
        }
    }

    pub fn variadic<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = Cell>,
        I::IntoIter: 'static,
    {
        let boxed: Box<dyn Iterator<Item = Cell>> = Box::new(cells.into_iter());
        Feed {
            source: FeedSource::Variadic(boxed.peekable()),
            index: 0,
            specifier: Binding::Unbound,
        }
    }

    pub fn empty() -> Self {
        Feed {
            source: FeedSource::Empty,
            index: 0,
            specifier: Binding::Unbound,
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self.source, FeedSource::Variadic(_))
    }
}

/// Bookkeeping for a frame that is running an action.
#[derive(Debug, Clone)]
pub struct ActionState {
    /// Paramlist of the action as it was invoked.
    pub original: NodeId,
    /// Paramlist whose dispatcher is currently running.
    pub phase: NodeId,
    /// Binding carried by the invoked action value.
    pub binding: Binding,
    /// Name the action was invoked through, if any.
    pub label: Option<NodeId>,
    /// Argument cells, parameter `n` at `args[n - 1]`. Grows as arguments are
    /// fulfilled, so everything present is initialized.
    pub args: Vec<Cell>,
    /// Exemplar supplying specialized values.
    pub special: Option<NodeId>,
    /// Varlist the arguments were moved into, once reified.
    pub varlist: Option<NodeId>,
    /// Data stack position when the call started.
    pub dsp_orig: usize,
    /// Frame whose feed supplied the arguments; variadic parameters keep
    /// reading from it after fulfillment.
    pub caller: Option<FrameSerial>,
}

impl ActionState {
    pub fn new(paramlist: NodeId, binding: Binding, label: Option<NodeId>, dsp: usize) -> Self {
        ActionState {
            original: paramlist,
            phase: paramlist,
            binding,
            label,
            args: Vec::new(),
            special: None,
            varlist: None,
            dsp_orig: dsp,
            caller: None,
        }
    }
}

#[derive(Debug)]
pub struct Frame {
    pub serial: FrameSerial,
    pub feed: Feed,
    pub out: Cell,
    pub spare: Cell,
    pub action: Option<ActionState>,
}

impl Frame {
    pub fn new(serial: FrameSerial, feed: Feed) -> Self {
        Frame {
            serial,
            feed,
            out: Cell::end(),
            spare: Cell::end(),
            action: None,
        }
    }

    pub fn is_running_action(&self) -> bool {
        self.action.is_some()
    }

    /// Arguments fulfilled so far; none when not running an action.
    pub fn progress(&self) -> usize {
        self.action.as_ref().map_or(0, |a| a.args.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variadic_feed_is_lazy() {
        let feed = Feed::variadic(vec![Cell::integer(1), Cell::integer(2)]);
        assert!(feed.is_variadic());
        let FeedSource::Variadic(mut iter) = feed.source else {
            panic!("expected a variadic source");
        };
        assert_eq!(iter.peek().and_then(Cell::as_integer), Some(1));
        assert_eq!(iter.count(), 2);
    }

    #[test]
    fn test_progress_tracks_args() {
        let mut frame = Frame::new(FrameSerial(1), Feed::empty());
        assert_eq!(frame.progress(), 0);
        let mut state = ActionState::new(NodeId::new(0, 0), Binding::Unbound, None, 0);
        state.args.push(Cell::integer(5));
        frame.action = Some(state);
        assert!(frame.is_running_action());
        assert_eq!(frame.progress(), 1);
    }
}
