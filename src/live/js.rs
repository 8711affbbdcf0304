//! Pre-composed client-side DOM commands.
//!
//! [`Js`] builds simple DOM changes that need no server round-trip.
//! Chain its methods and render the result as the value of a `phx-*`
//! attribute; the client executes the commands in order.

use std::time::Duration;

use serde_json::{json, Map, Value};

/// Default duration of transitions.
pub const DEFAULT_TRANSITION_DURATION: Duration = Duration::from_millis(200);

/// A set of CSS class changes over time. Classes are space-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// Classes applied for the duration of the transition.
    pub transition_class: String,
    /// Classes that apply at the start of the transition.
    pub start_class: String,
    /// Classes that apply at the end of the transition.
    pub end_class: String,
}

impl Transition {
    fn to_value(&self) -> Value {
        let split = |s: &str| -> Value {
            Value::Array(
                s.split_whitespace()
                    .map(|c| Value::String(c.to_string()))
                    .collect(),
            )
        };
        json!([
            split(&self.transition_class),
            split(&self.start_class),
            split(&self.end_class)
        ])
    }
}

/// Options for [`Js::hide`].
#[derive(Debug, Clone, Default)]
pub struct HideOpts {
    /// DOM selector to hide, or empty to target the interacted element.
    pub to: String,
    pub transition: Option<Transition>,
    /// Transition duration; zero means [`DEFAULT_TRANSITION_DURATION`].
    pub time: Duration,
}

/// Options for [`Js::show`].
#[derive(Debug, Clone, Default)]
pub struct ShowOpts {
    pub to: String,
    pub transition: Option<Transition>,
    pub time: Duration,
    /// CSS display value to set when showing; empty means `"block"`.
    pub display: String,
}

/// Options for [`Js::toggle`].
#[derive(Debug, Clone, Default)]
pub struct ToggleOpts {
    pub to: String,
    /// Transition applied when showing.
    pub show: Option<Transition>,
    /// Transition applied when hiding.
    pub hide: Option<Transition>,
    pub time: Duration,
    pub display: String,
}

/// Options for [`Js::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOpts {
    /// Selector or component id to push to.
    pub target: String,
    /// Selector to apply the phx loading classes to.
    pub loading: String,
    /// Trigger the page-loading events.
    pub page_loading: bool,
    /// Optional data for the event's `value` property.
    pub value: Option<Value>,
}

/// A chainable list of client commands.
#[derive(Debug, Clone, Default)]
pub struct Js {
    cmds: Vec<Value>,
}

impl Js {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide elements.
    pub fn hide(mut self, opts: HideOpts) -> Self {
        self.cmds.push(json!(["hide", {
            "to": selector(&opts.to),
            "transition": opts.transition.unwrap_or_default().to_value(),
            "time": millis(opts.time),
        }]));
        self
    }

    /// Show elements.
    pub fn show(mut self, opts: ShowOpts) -> Self {
        self.cmds.push(json!(["show", {
            "to": selector(&opts.to),
            "transition": opts.transition.unwrap_or_default().to_value(),
            "time": millis(opts.time),
            "display": display(&opts.display),
        }]));
        self
    }

    /// Toggle element visibility.
    pub fn toggle(mut self, opts: ToggleOpts) -> Self {
        self.cmds.push(json!(["toggle", {
            "to": selector(&opts.to),
            "ins": opts.show.unwrap_or_default().to_value(),
            "outs": opts.hide.unwrap_or_default().to_value(),
            "time": millis(opts.time),
            "display": display(&opts.display),
        }]));
        self
    }

    /// Push an event to the server.
    pub fn push(mut self, event: &str, opts: PushOpts) -> Self {
        let mut args = Map::new();
        args.insert("event".to_string(), Value::String(event.to_string()));
        if !opts.target.is_empty() {
            args.insert("target".to_string(), Value::String(opts.target));
        }
        if !opts.loading.is_empty() {
            args.insert("loading".to_string(), Value::String(opts.loading));
        }
        if opts.page_loading {
            args.insert("page_loading".to_string(), Value::Bool(true));
        }
        if let Some(value) = opts.value {
            args.insert("value".to_string(), value);
        }
        self.cmds.push(json!(["push", args]));
        self
    }

    /// Render the command list for a `phx-*` attribute value.
    pub fn to_json(&self) -> String {
        Value::Array(self.cmds.clone()).to_string()
    }
}

impl std::fmt::Display for Js {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_json())
    }
}

fn selector(to: &str) -> Value {
    if to.is_empty() {
        Value::Null
    } else {
        Value::String(to.to_string())
    }
}

fn millis(time: Duration) -> i64 {
    if time.is_zero() {
        DEFAULT_TRANSITION_DURATION.as_millis() as i64
    } else {
        time.as_millis() as i64
    }
}

fn display(d: &str) -> String {
    if d.is_empty() {
        "block".to_string()
    } else {
        d.to_string()
    }
}
