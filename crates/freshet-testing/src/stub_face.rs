#![forbid(unsafe_code)]

use std::{collections::HashMap, collections::VecDeque, time::Duration};

use async_trait::async_trait;
use freshet_net::{Data, Face, FaceError, Interest};
use parking_lot::Mutex;

/// One scripted behavior for a name. Scripts are consumed in FIFO order,
/// so retransmissions of the same name can see different outcomes.
pub enum Script {
    Reply { data: Data, delay: Duration },
    Fail { error: FaceError, delay: Duration },
    /// Never answer; the request queue's lifetime timeout settles it.
    Hang,
}

/// Face whose replies are fully scripted per name. Unscripted names hang.
#[derive(Default)]
pub struct ScriptedFace {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    expressed: Mutex<Vec<String>>,
}

impl ScriptedFace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, name: &str, script: Script) {
        self.scripts
            .lock()
            .entry(name.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn reply(&self, name: &str, data: Data, delay: Duration) {
        self.on(name, Script::Reply { data, delay });
    }

    pub fn fail(&self, name: &str, error: FaceError, delay: Duration) {
        self.on(name, Script::Fail { error, delay });
    }

    /// Names expressed so far, in order.
    pub fn expressed(&self) -> Vec<String> {
        self.expressed.lock().clone()
    }

    pub fn expressed_count(&self, name: &str) -> usize {
        self.expressed.lock().iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl Face for ScriptedFace {
    async fn express(&self, interest: &Interest) -> Result<Data, FaceError> {
        let name = interest.name.to_string();
        self.expressed.lock().push(name.clone());

        let script = self
            .scripts
            .lock()
            .get_mut(&name)
            .and_then(VecDeque::pop_front);
        match script {
            Some(Script::Reply { data, delay }) => {
                tokio::time::sleep(delay).await;
                Ok(data)
            }
            Some(Script::Fail { error, delay }) => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            Some(Script::Hang) | None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
