//! Form discovery on identity provider pages.
//!
//! Field names are read from the page instead of being hard-coded, so a
//! renamed input on the identity provider does not break the handshake.

use crate::{AuthResult, Credential};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

static FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form>").expect("FORM_RE should compile"));
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("INPUT_RE should compile"));
static BUTTON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<button\b([^>]*)>").expect("BUTTON_RE should compile"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("ATTR_RE should compile")
});
static ERROR_INDICATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class\s*=\s*["'][^"']*\bc-message\b[^"']*["']"#)
        .expect("ERROR_INDICATOR_RE should compile")
});

const USERNAME_HINTS: [&str; 4] = ["user", "login", "id", "account"];
const POST_BACK_FIELDS: [&str; 3] = ["samlresponse", "samlrequest", "relaystate"];
const POST_BACK_PREFIX: &str = "shib_idp_";

/// A `<form>` found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredForm {
    pub action: Option<String>,
    pub method: String,
    /// Named fields that are submitted as-is (hidden inputs and prefilled values).
    pub fields: Vec<(String, String)>,
    pub username_field: Option<String>,
    pub password_field: Option<String>,
    /// Name and value of the submit control, when it is named.
    pub submit: Option<(String, String)>,
    only_hidden_inputs: bool,
}

impl DiscoveredForm {
    /// Resolve the form action against the page it was found on.
    pub fn resolve_action(&self, page: &Url) -> AuthResult<Url> {
        match self.action.as_deref().map(str::trim) {
            None | Some("") => Ok(page.clone()),
            Some(action) => Ok(page.join(action)?),
        }
    }

    pub fn is_post(&self) -> bool {
        !self.method.eq_ignore_ascii_case("get")
    }

    /// Fields to submit with the credential filled in.
    pub fn fill(&self, credential: &Credential) -> Vec<(String, String)> {
        let mut fields = self.fields.clone();
        if let Some(name) = &self.username_field {
            fields.push((name.clone(), credential.identifier().to_string()));
        }
        if let Some(name) = &self.password_field {
            fields.push((name.clone(), credential.secret().to_string()));
        }
        if let Some(submit) = &self.submit {
            fields.push(submit.clone());
        }
        fields
    }

    /// Fields to submit when the form is posted back without user input.
    pub fn post_back_fields(&self) -> Vec<(String, String)> {
        let mut fields = self.fields.clone();
        if let Some(submit) = &self.submit {
            fields.push(submit.clone());
        }
        fields
    }

    fn is_login(&self) -> bool {
        self.password_field.is_some()
    }

    fn is_post_back(&self) -> bool {
        self.password_field.is_none()
            && self.only_hidden_inputs
            && self.fields.iter().any(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                POST_BACK_FIELDS.contains(&lower.as_str()) || lower.starts_with(POST_BACK_PREFIX)
            })
    }
}

/// All forms on the page, in document order.
pub fn find_forms(html: &str) -> Vec<DiscoveredForm> {
    FORM_RE
        .captures_iter(html)
        .map(|caps| {
            let attrs = parse_attrs(caps.get(1).map_or("", |m| m.as_str()));
            let inner = caps.get(2).map_or("", |m| m.as_str());
            parse_form(&attrs, inner)
        })
        .collect()
}

/// The first form with a password input.
pub fn find_login_form(html: &str) -> Option<DiscoveredForm> {
    find_forms(html).into_iter().find(DiscoveredForm::is_login)
}

/// A form a browser would submit by script (SAML responses, storage checks).
pub fn find_post_back_form(html: &str) -> Option<DiscoveredForm> {
    find_forms(html).into_iter().find(DiscoveredForm::is_post_back)
}

/// True when the page shows the identity provider's login error box.
pub fn has_error_indicator(html: &str) -> bool {
    ERROR_INDICATOR_RE.is_match(html)
}

fn parse_form(attrs: &HashMap<String, String>, inner: &str) -> DiscoveredForm {
    let mut fields = Vec::new();
    let mut username_field = None;
    let mut username_score = 0;
    let mut password_field = None;
    let mut submit = None;
    let mut only_hidden_inputs = true;

    for caps in INPUT_RE.captures_iter(inner) {
        let input = parse_attrs(caps.get(1).map_or("", |m| m.as_str()));
        let kind = input
            .get("type")
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| "text".to_string());
        let Some(name) = input.get("name").filter(|n| !n.is_empty()).cloned() else {
            continue;
        };
        let value = input.get("value").cloned().unwrap_or_default();

        if kind != "hidden" && kind != "submit" {
            only_hidden_inputs = false;
        }

        match kind.as_str() {
            "hidden" => fields.push((name, value)),
            "password" => {
                if password_field.is_none() {
                    password_field = Some(name);
                }
            }
            "text" | "email" | "tel" => {
                let score = username_score_for(&name);
                if username_field.is_none() || score > username_score {
                    if let Some(previous) = username_field.replace(name) {
                        fields.push((previous, String::new()));
                    }
                    username_score = score;
                } else if !value.is_empty() {
                    fields.push((name, value));
                }
            }
            "submit" => {
                if submit.is_none() {
                    submit = Some((name, value));
                }
            }
            "checkbox" | "radio" => {
                if input.contains_key("checked") {
                    let value = if value.is_empty() { "on".to_string() } else { value };
                    fields.push((name, value));
                }
            }
            _ => {}
        }
    }

    if submit.is_none() {
        submit = BUTTON_RE.captures_iter(inner).find_map(|caps| {
            let button = parse_attrs(caps.get(1).map_or("", |m| m.as_str()));
            let kind = button.get("type").map(|t| t.to_ascii_lowercase());
            if matches!(kind.as_deref(), Some("button") | Some("reset")) {
                return None;
            }
            let name = button.get("name").filter(|n| !n.is_empty())?.clone();
            Some((name, button.get("value").cloned().unwrap_or_default()))
        });
    }

    DiscoveredForm {
        action: attrs.get("action").cloned(),
        method: attrs
            .get("method")
            .cloned()
            .unwrap_or_else(|| "get".to_string()),
        fields,
        username_field,
        password_field,
        submit,
        only_hidden_inputs,
    }
}

fn username_score_for(name: &str) -> usize {
    let lower = name.to_ascii_lowercase();
    if lower == "username" || lower == "j_username" {
        return USERNAME_HINTS.len() + 1;
    }
    USERNAME_HINTS
        .iter()
        .rev()
        .position(|hint| lower.contains(hint))
        .map_or(0, |pos| pos + 1)
}

fn parse_attrs(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((key, decode_entities(value)))
        })
        .collect()
}

/// Decode the character references that appear in attribute values.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';').filter(|&end| end <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
