use serde_json::Value;
use std::sync::Arc;
use store::paths::{LOAD_DETECTION, TERMINATE};
use store::{RemoteTree, StoreError};

/// External triggers written as `1` to well-known keys of the remote tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Load,
    Terminate,
}

impl ControlCommand {
    pub fn key(&self) -> &'static str {
        match self {
            ControlCommand::Load => LOAD_DETECTION,
            ControlCommand::Terminate => TERMINATE,
        }
    }
}

/// Polls the control keys. A trigger stays set until [`acknowledge`] removes
/// it, so a command is never lost between a poll and the action it causes.
///
/// [`acknowledge`]: ControlListener::acknowledge
pub struct ControlListener {
    tree: Arc<dyn RemoteTree>,
}

impl ControlListener {
    pub fn new(tree: Arc<dyn RemoteTree>) -> Self {
        Self { tree }
    }

    /// Pending commands, `Terminate` before `Load` so a stop-and-reload pair
    /// ends with a fresh session.
    pub fn poll(&self) -> Result<Vec<ControlCommand>, StoreError> {
        let mut pending = Vec::new();
        for cmd in [ControlCommand::Terminate, ControlCommand::Load] {
            if self.tree.get(cmd.key())?.as_ref().is_some_and(is_set) {
                pending.push(cmd);
            }
        }
        Ok(pending)
    }

    pub fn acknowledge(&self, cmd: ControlCommand) -> Result<(), StoreError> {
        self.tree.remove(cmd.key())
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use store::MemoryTree;

    fn listener() -> (Arc<MemoryTree>, ControlListener) {
        let tree = Arc::new(MemoryTree::new());
        (tree.clone(), ControlListener::new(tree))
    }

    #[test]
    fn test_nothing_pending() {
        let (_, listener) = listener();
        assert!(listener.poll().unwrap().is_empty());
    }

    #[test]
    fn test_load_trigger() {
        let (tree, listener) = listener();
        tree.set(LOAD_DETECTION, &json!(1)).unwrap();

        assert_eq!(listener.poll().unwrap(), vec![ControlCommand::Load]);
        // Still pending until acknowledged
        assert_eq!(listener.poll().unwrap(), vec![ControlCommand::Load]);

        listener.acknowledge(ControlCommand::Load).unwrap();
        assert!(listener.poll().unwrap().is_empty());
        assert_eq!(tree.get(LOAD_DETECTION).unwrap(), None);
    }

    #[test]
    fn test_terminate_comes_first() {
        let (tree, listener) = listener();
        tree.set(LOAD_DETECTION, &json!("1")).unwrap();
        tree.set(TERMINATE, &json!(true)).unwrap();

        assert_eq!(
            listener.poll().unwrap(),
            vec![ControlCommand::Terminate, ControlCommand::Load]
        );
    }

    #[test]
    fn test_falsy_values_ignored() {
        for value in [json!(0), json!(false), json!("0"), json!({"x": 1})] {
            let (tree, listener) = listener();
            tree.set(TERMINATE, &value).unwrap();
            assert!(listener.poll().unwrap().is_empty(), "{value} should not trigger");
        }
    }
}
