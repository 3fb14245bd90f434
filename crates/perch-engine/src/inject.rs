//! Reply delivery into the focused window: clipboard paste plus the send
//! chord, matching how the watched chat UI expects input.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use arboard::Clipboard;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};

/// Grace period between writing the clipboard and pasting, so the clipboard
/// owner has settled before the chord fires.
const CLIPBOARD_SETTLE: Duration = Duration::from_millis(500);

/// Copies `text` into the clipboard, then drives ctrl+v followed by
/// ctrl+enter into whichever window currently has focus.
pub fn paste_and_send(text: &str) -> Result<()> {
    let mut clipboard = Clipboard::new().context("failed to open the clipboard")?;
    clipboard
        .set_text(text.to_string())
        .context("failed to write the reply to the clipboard")?;
    thread::sleep(CLIPBOARD_SETTLE);

    let mut enigo = Enigo::new(&Settings::default()).context("failed to open the input driver")?;
    control_chord(&mut enigo, Key::Unicode('v')).context("paste chord failed")?;
    control_chord(&mut enigo, Key::Return).context("send chord failed")?;
    log::info!("reply pasted and sent ({} chars)", text.chars().count());
    Ok(())
}

fn control_chord(enigo: &mut Enigo, key: Key) -> Result<()> {
    enigo.key(Key::Control, Direction::Press)?;
    enigo.key(key, Direction::Click)?;
    enigo.key(Key::Control, Direction::Release)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::paste_and_send;

    #[test]
    #[ignore = "requires a desktop session with clipboard and input access"]
    fn delivers_without_error_on_a_live_desktop() {
        paste_and_send("perch delivery smoke test").expect("delivery failed");
    }
}
