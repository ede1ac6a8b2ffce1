//! Typed constructors for schema-2.0 interactive cards.
//!
//! The composers in the gateway stack these into the actual authorization,
//! permission and new-session cards; this module only knows element shapes.

use {
    serde_json::{Value, json},
};

use larkin_protocol::events::CardActionValue;

/// Header accent colors Feishu understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Blue,
    Green,
    Red,
    Grey,
    Orange,
}

impl Template {
    fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Red => "red",
            Self::Grey => "grey",
            Self::Orange => "orange",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Default,
    Primary,
    Danger,
}

impl ButtonStyle {
    fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Primary => "primary",
            Self::Danger => "danger",
        }
    }
}

/// Incrementally built card body.
#[derive(Debug, Clone)]
pub struct Card {
    title: String,
    template: Template,
    elements: Vec<Value>,
}

impl Card {
    pub fn new(title: impl Into<String>, template: Template) -> Self {
        Self {
            title: title.into(),
            template,
            elements: Vec::new(),
        }
    }

    /// Append a `lark_md` text block.
    #[must_use]
    pub fn markdown(mut self, content: impl Into<String>) -> Self {
        self.elements.push(json!({
            "tag": "div",
            "text": { "tag": "lark_md", "content": content.into() },
        }));
        self
    }

    #[must_use]
    pub fn hr(mut self) -> Self {
        self.elements.push(json!({ "tag": "hr" }));
        self
    }

    /// Append a row of buttons, one weighted column per button.
    #[must_use]
    pub fn buttons(mut self, buttons: Vec<Value>) -> Self {
        self.elements.push(column_set(buttons));
        self
    }

    /// Append an arbitrary prebuilt element.
    #[must_use]
    pub fn element(mut self, element: Value) -> Self {
        self.elements.push(element);
        self
    }

    /// Finish into the schema-2.0 envelope.
    #[must_use]
    pub fn build(self) -> Value {
        json!({
            "schema": "2.0",
            "config": { "wide_screen_mode": true },
            "header": {
                "title": { "tag": "plain_text", "content": self.title },
                "template": self.template.as_str(),
            },
            "body": {
                "direction": "vertical",
                "elements": self.elements,
            },
        })
    }
}

/// A callback button carrying a typed action value.
#[must_use]
pub fn button(label: &str, style: ButtonStyle, value: &CardActionValue) -> Value {
    json!({
        "tag": "button",
        "text": { "tag": "plain_text", "content": label },
        "type": style.as_str(),
        "behaviors": [{
            "type": "callback",
            "value": value,
        }],
    })
}

/// A form-submitting button; named inputs of the surrounding form ride along
/// in the event's `form_value`.
#[must_use]
pub fn submit_button(label: &str, style: ButtonStyle, value: &CardActionValue) -> Value {
    json!({
        "tag": "button",
        "name": "submit",
        "form_action_type": "submit",
        "text": { "tag": "plain_text", "content": label },
        "type": style.as_str(),
        "behaviors": [{
            "type": "callback",
            "value": value,
        }],
    })
}

/// A static dropdown with `(value, label)` options.
#[must_use]
pub fn select_static(name: &str, placeholder: &str, options: &[(String, String)]) -> Value {
    let options: Vec<Value> = options
        .iter()
        .map(|(value, label)| {
            json!({
                "text": { "tag": "plain_text", "content": label },
                "value": value,
            })
        })
        .collect();
    json!({
        "tag": "select_static",
        "name": name,
        "placeholder": { "tag": "plain_text", "content": placeholder },
        "options": options,
    })
}

/// A single-line text input.
#[must_use]
pub fn text_input(name: &str, placeholder: &str, default_value: &str) -> Value {
    json!({
        "tag": "input",
        "name": name,
        "placeholder": { "tag": "plain_text", "content": placeholder },
        "default_value": default_value,
    })
}

/// Wrap named elements into a form so a submit button can collect them.
#[must_use]
pub fn form(elements: Vec<Value>) -> Value {
    json!({
        "tag": "form",
        "name": "form",
        "elements": elements,
    })
}

fn column_set(buttons: Vec<Value>) -> Value {
    let columns: Vec<Value> = buttons
        .into_iter()
        .map(|b| {
            json!({
                "tag": "column",
                "width": "weighted",
                "vertical_align": "top",
                "elements": [b],
            })
        })
        .collect();
    json!({
        "tag": "column_set",
        "flex_mode": "none",
        "horizontal_spacing": "8px",
        "background_style": "default",
        "columns": columns,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_envelope() {
        let card = Card::new("标题", Template::Blue).markdown("**hi**").build();
        assert_eq!(card["schema"], "2.0");
        assert_eq!(card["header"]["title"]["content"], "标题");
        assert_eq!(card["header"]["template"], "blue");
        assert_eq!(card["body"]["elements"][0]["text"]["tag"], "lark_md");
    }

    #[test]
    fn test_button_carries_action_value() {
        let value = CardActionValue::DenyRegister {
            callback_url: "http://b".into(),
            owner_id: "ou_x".into(),
        };
        let b = button("拒绝", ButtonStyle::Danger, &value);
        assert_eq!(b["type"], "danger");
        assert_eq!(b["behaviors"][0]["type"], "callback");
        assert_eq!(b["behaviors"][0]["value"]["action"], "deny_register");
        assert_eq!(b["behaviors"][0]["value"]["owner_id"], "ou_x");
    }

    #[test]
    fn test_button_row_columns() {
        let value = CardActionValue::NewSubmit {};
        let card = Card::new("t", Template::Green)
            .buttons(vec![
                button("a", ButtonStyle::Primary, &value),
                button("b", ButtonStyle::Default, &value),
            ])
            .build();
        let set = &card["body"]["elements"][0];
        assert_eq!(set["tag"], "column_set");
        assert_eq!(set["columns"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_select_options() {
        let opts = vec![
            ("/a".to_string(), "/a".to_string()),
            ("/b".to_string(), "b (最近)".to_string()),
        ];
        let select = select_static("dir", "选择目录", &opts);
        assert_eq!(select["options"][1]["value"], "/b");
        assert_eq!(select["options"][1]["text"]["content"], "b (最近)");
    }

    #[test]
    fn test_form_wraps_named_elements() {
        let f = form(vec![text_input("prompt", "想做什么？", "")]);
        assert_eq!(f["tag"], "form");
        assert_eq!(f["elements"][0]["name"], "prompt");
    }
}
