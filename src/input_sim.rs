use crate::error::HandlerError;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};

fn enigo() -> Result<Enigo, HandlerError> {
    Enigo::new(&Settings::default()).map_err(|e| HandlerError::new(format!("input backend: {e}")))
}

/// Types text into the focused window.
pub fn type_text(text: &str, use_clipboard: bool) -> Result<(), HandlerError> {
    if use_clipboard {
        type_via_clipboard(text)
    } else {
        enigo()?
            .text(text)
            .map_err(|e| HandlerError::new(format!("typing failed: {e}")))
    }
}

/// Clipboard + Ctrl+V
fn type_via_clipboard(text: &str) -> Result<(), HandlerError> {
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| HandlerError::new(format!("open clipboard: {e}")))?;
    clipboard
        .set_text(text)
        .map_err(|e| HandlerError::new(format!("write clipboard: {e}")))?;

    // give the clipboard owner a moment before pasting
    std::thread::sleep(std::time::Duration::from_millis(50));

    press_keys(&[Key::Control, Key::Unicode('v')], "CTRL+V")
}

/// Presses a key combination such as "ALT+TAB", "CTRL+SHIFT+S" or "F2".
pub fn send_shortcut(shortcut: &str) -> Result<(), HandlerError> {
    let keys = parse_shortcut(shortcut)?;
    press_keys(&keys, shortcut)
}

fn press_keys(keys: &[Key], label: &str) -> Result<(), HandlerError> {
    let mut enigo = enigo()?;
    for key in keys {
        enigo
            .key(*key, Direction::Press)
            .map_err(|e| HandlerError::new(format!("press {label}: {e}")))?;
    }
    // release in reverse
    for key in keys.iter().rev() {
        enigo
            .key(*key, Direction::Release)
            .map_err(|e| HandlerError::new(format!("release {label}: {e}")))?;
    }
    Ok(())
}

fn parse_shortcut(shortcut: &str) -> Result<Vec<Key>, HandlerError> {
    shortcut
        .split('+')
        .map(|part| parse_key(part.trim()))
        .collect()
}

fn parse_key(name: &str) -> Result<Key, HandlerError> {
    let upper = name.to_uppercase();
    let key = match upper.as_str() {
        "CTRL" | "CONTROL" => Key::Control,
        "ALT" => Key::Alt,
        "SHIFT" => Key::Shift,
        "META" | "WIN" | "SUPER" => Key::Meta,
        "TAB" => Key::Tab,
        "ENTER" | "RETURN" => Key::Return,
        "ESCAPE" | "ESC" => Key::Escape,
        "SPACE" => Key::Space,
        "BACKSPACE" => Key::Backspace,
        "DELETE" | "DEL" => Key::Delete,
        "UP" => Key::UpArrow,
        "DOWN" => Key::DownArrow,
        "LEFT" => Key::LeftArrow,
        "RIGHT" => Key::RightArrow,
        "HOME" => Key::Home,
        "END" => Key::End,
        "PAGEUP" => Key::PageUp,
        "PAGEDOWN" => Key::PageDown,
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,
        _ => {
            let mut chars = upper.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c.to_ascii_lowercase()),
                _ => return Err(HandlerError::new(format!("unknown key: {name}"))),
            }
        }
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combinations() {
        assert_eq!(
            parse_shortcut("ctrl+Shift+s").unwrap(),
            vec![Key::Control, Key::Shift, Key::Unicode('s')]
        );
        assert_eq!(parse_shortcut("META + TAB").unwrap(), vec![Key::Meta, Key::Tab]);
    }

    #[test]
    fn unknown_key_is_a_handler_error() {
        assert_eq!(
            parse_shortcut("CTRL+HYPER").unwrap_err(),
            HandlerError::new("unknown key: HYPER")
        );
    }
}
