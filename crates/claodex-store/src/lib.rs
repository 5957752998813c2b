//! Filesystem state for a claodex workspace: the `.claodex/` layout, cursor
//! files, and participant records.

mod cursor;
mod fsutil;
mod participant;
mod paths;

pub use cursor::{
    cursor_snapshot, initialize_cursors_from_line_counts, read_cursor, read_delivery_cursor,
    read_read_cursor, write_cursor, write_delivery_cursor, write_read_cursor, CursorSnapshot,
};
pub use fsutil::{count_lines, read_lines_between, write_atomic};
pub use participant::{load_participant, Participant, SessionParticipants};
pub use paths::{
    delivery_cursor_file, ensure_gitignore_entry, ensure_state_layout, events_file,
    exchanges_dir, metrics_file, participant_file, participants_dir, read_cursor_file,
    state_root,
};
