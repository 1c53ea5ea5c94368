//! Local board: rules capability, move hooks and the controller that owns the
//! canonical position.

mod controller;
mod hooks;
mod rules;

pub use controller::{BoardController, CheckmateCallback};
pub use hooks::{HookKey, HookRegistry, PostHook, PreHook};
pub use rules::{
    MalformedMove, MalformedPosition, MoveRecord, MoveRequest, PieceKind, Position, STARTING_LAYOUT,
    Side, Square,
};
