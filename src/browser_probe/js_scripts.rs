//! JavaScript evaluation scripts
//!
//! This module contains the JavaScript code used to inspect pages during a
//! browser probe. Every script returns a JSON shape matching a serde struct
//! in [`crate::model`].

/// Empty-content signals: trimmed body text length and a bounded count of
/// visible non-script/style elements.
pub const EMPTY_CONTENT_SCRIPT: &str = r"
    (() => {
        const body = document.body;
        const text_length = body ? body.innerText.trim().length : 0;
        let visible_elements = 0;
        if (body) {
            for (const el of body.querySelectorAll('*')) {
                const tag = el.tagName;
                if (tag === 'SCRIPT' || tag === 'STYLE' || tag === 'NOSCRIPT') continue;
                const rect = el.getBoundingClientRect();
                if (rect.width > 0 && rect.height > 0) {
                    visible_elements++;
                    if (visible_elements >= 5) break;
                }
            }
        }
        return { text_length, visible_elements };
    })()
";

/// Enumerate iframes. Cross-origin contents are never touched: load success
/// is inferred from src validity, connectedness, and a non-zero layout box.
pub const IFRAME_SCRIPT: &str = r"
    (() => {
        return Array.from(document.getElementsByTagName('iframe')).map(frame => {
            const src = frame.getAttribute('src');
            const hasValidSrc = !!src && src.trim().length > 0 && !src.startsWith('javascript:');
            const rect = frame.getBoundingClientRect();
            const connected = frame.isConnected;
            const hasBox = rect.width > 0 && rect.height > 0;
            return {
                src: src || null,
                hasValidSrc,
                connected,
                hasBox,
                loaded: hasValidSrc && connected && hasBox
            };
        });
    })()
";

/// Read `<video>` readiness signals. Playability itself is derived on the
/// Rust side so the rule lives next to the classifier.
pub const VIDEO_SCRIPT: &str = r"
    (() => {
        return Array.from(document.getElementsByTagName('video')).map(video => {
            const hasSource = !!(video.currentSrc || video.src || video.querySelector('source'));
            return {
                readyState: video.readyState,
                networkState: video.networkState,
                hasSource,
                errorCode: video.error ? video.error.code : null,
                errorMessage: video.error ? (video.error.message || null) : null
            };
        });
    })()
";

/// Whether any password input is present in the DOM. Used by login
/// verification: a vanished password field implies the form was accepted.
pub const HAS_PASSWORD_INPUT_SCRIPT: &str = r#"
    (() => document.querySelector('input[type="password"]') !== null)()
"#;

/// Current page URL as the browser sees it (after any redirects).
pub const CURRENT_URL_SCRIPT: &str = "(() => window.location.href)()";

/// Build a script resolving the first present-and-visible selector from an
/// ordered candidate list. Returns the winning selector string or null.
#[must_use]
pub fn first_visible_selector_script(selectors: &[&str]) -> String {
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r"
        (() => {{
            for (const sel of {list}) {{
                let el;
                try {{ el = document.querySelector(sel); }} catch (_) {{ continue; }}
                if (!el) continue;
                const rect = el.getBoundingClientRect();
                if (rect.width > 0 && rect.height > 0) return sel;
            }}
            return null;
        }})()
        "
    )
}

/// Build a script collecting non-empty text from elements matching any of the
/// given selectors. Used to read visible login error messages.
#[must_use]
pub fn collect_text_script(selectors: &[&str]) -> String {
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r"
        (() => {{
            const messages = [];
            for (const sel of {list}) {{
                let found;
                try {{ found = document.querySelectorAll(sel); }} catch (_) {{ continue; }}
                for (const el of found) {{
                    const text = (el.innerText || '').trim();
                    if (text.length > 0) messages.push(text);
                }}
            }}
            return messages;
        }})()
        "
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_scripts_embed_candidates() {
        let script = first_visible_selector_script(&["#user", "input[type=\"email\"]"]);
        assert!(script.contains("#user"));
        assert!(script.contains("input[type=\\\"email\\\"]"));

        let script = collect_text_script(&[".error-message"]);
        assert!(script.contains(".error-message"));
    }
}
