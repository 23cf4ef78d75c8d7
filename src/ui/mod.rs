/// UI helpers that sit between the iced view and the rest of the app
///
/// - Preview decoding and sizing (preview.rs)

pub mod preview;
