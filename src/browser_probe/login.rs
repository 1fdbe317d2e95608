//! Programmatic login subroutine
//!
//! Drives page- and modal-style login forms before a probe navigates to its
//! target. Selector resolution tries the caller's hints first, then ordered
//! fallback lists of common form selectors. Verification is a fixed ordered
//! check chain; its decision logic is pure so it can be tested without a
//! browser.

use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::Page;
use tracing::{debug, info, warn};

use super::js_scripts::{
    collect_text_script, first_visible_selector_script, CURRENT_URL_SCRIPT,
    HAS_PASSWORD_INPUT_SCRIPT,
};
use super::listeners::ProbeListeners;
use crate::model::{BrowserLoginConfig, LoginType};

/// Ceiling on the post-navigation network-idle wait before form interaction.
const LOGIN_IDLE_CEILING: Duration = Duration::from_secs(20);

/// Pause for modal open animations.
const MODAL_ANIMATION_PAUSE: Duration = Duration::from_millis(1_000);

/// Pause for post-submit navigation to settle.
const POST_SUBMIT_PAUSE: Duration = Duration::from_secs(3);

/// Fallback selectors for the username/email input.
const USERNAME_SELECTORS: &[&str] = &[
    "input[type=\"email\"]",
    "input[name=\"email\"]",
    "input[name=\"username\"]",
    "input[name=\"login\"]",
    "input[id*=\"email\" i]",
    "input[id*=\"user\" i]",
    "input[autocomplete=\"username\"]",
    "input[type=\"text\"]",
];

/// Fallback selectors for the password input.
const PASSWORD_SELECTORS: &[&str] = &[
    "input[type=\"password\"]",
    "input[name=\"password\"]",
    "input[id*=\"pass\" i]",
];

/// Fallback selectors for the submit control.
const SUBMIT_SELECTORS: &[&str] = &[
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    "button[id*=\"login\" i]",
    "button[class*=\"login\" i]",
    "button[class*=\"submit\" i]",
    "button[id*=\"signin\" i]",
];

/// Fallback selectors for elements that open a login modal.
const MODAL_TRIGGER_SELECTORS: &[&str] = &[
    "[data-login]",
    "a[href*=\"login\" i]",
    "button[class*=\"login\" i]",
    "a[class*=\"login\" i]",
    "a[href*=\"signin\" i]",
    "button[class*=\"signin\" i]",
];

/// Selectors whose visible text indicates a rejected login.
const ERROR_MESSAGE_SELECTORS: &[&str] = &[
    ".error-message",
    ".login-error",
    ".alert-danger",
    ".invalid-feedback",
    "[role=\"alert\"]",
    ".error",
];

/// Selectors whose presence indicates an authenticated session.
const LOGGED_IN_SELECTORS: &[&str] = &[
    "[data-user-menu]",
    ".user-menu",
    ".account-menu",
    ".avatar",
    "a[href*=\"logout\" i]",
    "button[class*=\"logout\" i]",
    "a[href*=\"signout\" i]",
];

/// Outcome of the login subroutine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginVerdict {
    /// Login considered successful.
    Success {
        /// True when the session-reuse shortcut skipped credential entry.
        reused: bool,
        /// True when only the lenient final rule matched.
        lenient: bool,
    },
    /// Login failed with a reason for diagnostics.
    Failed(String),
}

impl LoginVerdict {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Signals gathered from the page for the verification decision.
#[derive(Debug, Clone, Default)]
pub struct VerificationSignals {
    /// `Some(present)` when a `login_success_selector` is configured.
    pub success_selector_present: Option<bool>,
    /// URL the browser currently shows.
    pub current_url: String,
    /// Non-empty texts found under the error-message selectors.
    pub error_messages: Vec<String>,
    /// Whether any logged-in indicator is present and visible.
    pub logged_in_indicator: bool,
    /// Whether a password input is still in the DOM.
    pub password_input_present: bool,
}

/// Run the login flow against `page`. The caller wraps this in the probe's
/// remaining deadline; an overrun is reported by the caller as an auth
/// failure, not here.
pub async fn run_login(
    page: &Page,
    target_url: &str,
    config: &BrowserLoginConfig,
    listeners: &ProbeListeners,
) -> Result<LoginVerdict> {
    let login_url = config.login_url.as_deref().unwrap_or(target_url);

    debug!(login_url, login_type = ?config.login_type, "starting login subroutine");
    page.goto(login_url).await.context("login navigation failed")?;
    let _ = page.wait_for_navigation().await;
    listeners.wait_for_network_idle(LOGIN_IDLE_CEILING).await;

    if config.login_type == LoginType::Modal {
        open_login_modal(page, config).await?;
    }

    // Session-reuse shortcut: a still-valid session passes verification
    // without touching the form. Only a conclusive pass counts; the lenient
    // fallback always "passes" and would make the shortcut vacuous.
    let pre_check = gather_signals(page, config).await?;
    if matches!(evaluate_verification(&pre_check), LoginVerdict::Success { lenient: false, .. }) {
        info!(login_url, "existing session still valid, skipping credential entry");
        return Ok(LoginVerdict::Success { reused: true, lenient: false });
    }

    fill_and_submit(page, config).await?;
    tokio::time::sleep(POST_SUBMIT_PAUSE).await;

    let signals = gather_signals(page, config).await?;
    let verdict = evaluate_verification(&signals);
    match &verdict {
        LoginVerdict::Success { lenient: true, .. } => {
            warn!(login_url, "login verification inconclusive, assuming success");
        }
        LoginVerdict::Success { .. } => debug!(login_url, "login verified"),
        LoginVerdict::Failed(reason) => warn!(login_url, reason, "login failed"),
    }
    Ok(verdict)
}

async fn open_login_modal(page: &Page, config: &BrowserLoginConfig) -> Result<()> {
    let trigger = resolve_selector(
        page,
        config.modal_trigger_selector.as_deref(),
        MODAL_TRIGGER_SELECTORS,
    )
    .await?;

    let Some(selector) = trigger else {
        anyhow::bail!("login modal trigger not found");
    };
    debug!(selector, "opening login modal");
    page.find_element(&selector)
        .await
        .context("modal trigger vanished before click")?
        .click()
        .await
        .context("failed to click modal trigger")?;
    tokio::time::sleep(MODAL_ANIMATION_PAUSE).await;
    Ok(())
}

async fn fill_and_submit(page: &Page, config: &BrowserLoginConfig) -> Result<()> {
    let username = config
        .username
        .as_deref()
        .context("browser login requires a username")?;
    let password = config
        .password
        .as_deref()
        .context("browser login requires a password")?;

    let username_selector =
        resolve_selector(page, config.username_selector.as_deref(), USERNAME_SELECTORS)
            .await?
            .context("login input not found: username")?;
    let password_selector =
        resolve_selector(page, config.password_selector.as_deref(), PASSWORD_SELECTORS)
            .await?
            .context("login input not found: password")?;

    let username_el = page
        .find_element(&username_selector)
        .await
        .context("username input vanished before fill")?;
    username_el.click().await.ok();
    username_el
        .type_str(username)
        .await
        .context("failed to type username")?;

    let password_el = page
        .find_element(&password_selector)
        .await
        .context("password input vanished before fill")?;
    password_el.click().await.ok();
    password_el
        .type_str(password)
        .await
        .context("failed to type password")?;

    let submit =
        resolve_selector(page, config.submit_selector.as_deref(), SUBMIT_SELECTORS).await?;
    match submit {
        Some(selector) => {
            debug!(selector, "submitting login form");
            page.find_element(&selector)
                .await
                .context("submit control vanished before click")?
                .click()
                .await
                .context("failed to click submit")?;
        }
        None => {
            // No submit control; Enter in the password field usually works.
            debug!("no submit control found, pressing Enter in password field");
            password_el
                .press_key("Enter")
                .await
                .context("failed to press Enter in password field")?;
        }
    }
    Ok(())
}

/// Resolve the first present-and-visible selector: the caller's hint wins,
/// then the fallback list in order.
async fn resolve_selector(
    page: &Page,
    hint: Option<&str>,
    fallbacks: &[&str],
) -> Result<Option<String>> {
    let mut candidates: Vec<&str> = Vec::with_capacity(fallbacks.len() + 1);
    if let Some(hint) = hint
        && !hint.trim().is_empty()
    {
        candidates.push(hint);
    }
    candidates.extend_from_slice(fallbacks);

    let script = first_visible_selector_script(&candidates);
    let winner: Option<String> = page
        .evaluate(script)
        .await
        .context("selector resolution script failed")?
        .into_value()
        .unwrap_or(None);
    Ok(winner)
}

/// Gather the verification signals from the live page.
async fn gather_signals(page: &Page, config: &BrowserLoginConfig) -> Result<VerificationSignals> {
    let success_selector_present = match config.login_success_selector.as_deref() {
        Some(selector) if !selector.trim().is_empty() => {
            Some(page.find_element(selector).await.is_ok())
        }
        _ => None,
    };

    let current_url: String = page
        .evaluate(CURRENT_URL_SCRIPT)
        .await
        .context("failed to read current URL")?
        .into_value()
        .unwrap_or_default();

    let error_messages: Vec<String> = page
        .evaluate(collect_text_script(ERROR_MESSAGE_SELECTORS))
        .await
        .context("failed to read error messages")?
        .into_value()
        .unwrap_or_default();

    let logged_in_indicator = resolve_selector(page, None, LOGGED_IN_SELECTORS)
        .await?
        .is_some();

    let password_input_present: bool = page
        .evaluate(HAS_PASSWORD_INPUT_SCRIPT)
        .await
        .context("failed to check for password input")?
        .into_value()
        .unwrap_or(false);

    Ok(VerificationSignals {
        success_selector_present,
        current_url,
        error_messages,
        logged_in_indicator,
        password_input_present,
    })
}

/// Whether a URL still looks like a login page.
fn looks_like_login_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("login") || lower.contains("signin")
}

/// The ordered verification decision. First matching rule returns:
/// 1. A configured success selector decides alone: present → success,
///    absent → failure.
/// 2. Still on a login-ish URL with visible error text → failure.
/// 3. A logged-in indicator is present → success.
/// 4. No password input remains in the DOM → success (inferred navigation).
/// 5. The URL moved away from login → success.
/// 6. Nothing conclusive → lenient success.
#[must_use]
pub fn evaluate_verification(signals: &VerificationSignals) -> LoginVerdict {
    if let Some(present) = signals.success_selector_present {
        return if present {
            LoginVerdict::Success { reused: false, lenient: false }
        } else {
            LoginVerdict::Failed("login success selector not found".into())
        };
    }

    if looks_like_login_url(&signals.current_url) && !signals.error_messages.is_empty() {
        return LoginVerdict::Failed(signals.error_messages.join("; "));
    }

    if signals.logged_in_indicator {
        return LoginVerdict::Success { reused: false, lenient: false };
    }

    if !signals.password_input_present {
        return LoginVerdict::Success { reused: false, lenient: false };
    }

    if !signals.current_url.is_empty() && !looks_like_login_url(&signals.current_url) {
        return LoginVerdict::Success { reused: false, lenient: false };
    }

    LoginVerdict::Success { reused: false, lenient: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_signals() -> VerificationSignals {
        VerificationSignals {
            success_selector_present: None,
            current_url: "https://app.example.com/dashboard".into(),
            error_messages: Vec::new(),
            logged_in_indicator: false,
            password_input_present: false,
        }
    }

    #[test]
    fn success_selector_decides_alone() {
        let mut signals = base_signals();
        signals.success_selector_present = Some(true);
        assert!(evaluate_verification(&signals).succeeded());

        signals.success_selector_present = Some(false);
        // Even on a non-login URL, a missing success selector fails.
        assert_eq!(
            evaluate_verification(&signals),
            LoginVerdict::Failed("login success selector not found".into())
        );
    }

    #[test]
    fn visible_error_on_login_page_fails() {
        let mut signals = base_signals();
        signals.current_url = "https://app.example.com/login".into();
        signals.password_input_present = true;
        signals.error_messages = vec!["Invalid credentials".into(), "Try again".into()];
        assert_eq!(
            evaluate_verification(&signals),
            LoginVerdict::Failed("Invalid credentials; Try again".into())
        );
    }

    #[test]
    fn error_text_off_login_page_does_not_fail() {
        let mut signals = base_signals();
        signals.error_messages = vec!["Unrelated banner".into()];
        assert!(evaluate_verification(&signals).succeeded());
    }

    #[test]
    fn logged_in_indicator_wins_over_remaining_password_field() {
        let mut signals = base_signals();
        signals.current_url = "https://app.example.com/login".into();
        signals.logged_in_indicator = true;
        signals.password_input_present = true;
        assert!(evaluate_verification(&signals).succeeded());
    }

    #[test]
    fn vanished_password_input_is_success() {
        let mut signals = base_signals();
        signals.current_url = "https://app.example.com/signin".into();
        signals.password_input_present = false;
        assert!(evaluate_verification(&signals).succeeded());
    }

    #[test]
    fn url_moved_away_from_login_is_success() {
        let mut signals = base_signals();
        signals.password_input_present = true;
        signals.current_url = "https://app.example.com/home".into();
        assert!(evaluate_verification(&signals).succeeded());
    }

    #[test]
    fn inconclusive_signals_succeed_leniently() {
        let mut signals = base_signals();
        signals.current_url = "https://app.example.com/login".into();
        signals.password_input_present = true;
        assert_eq!(
            evaluate_verification(&signals),
            LoginVerdict::Success { reused: false, lenient: true }
        );
    }

    #[test]
    fn login_url_detection() {
        assert!(looks_like_login_url("https://a.com/LOGIN"));
        assert!(looks_like_login_url("https://a.com/auth/signin?next=/"));
        assert!(!looks_like_login_url("https://a.com/dashboard"));
    }
}
