use chrono::Utc;

use super::AutoController;
use super::types::ControlCommand;

impl AutoController {
    pub(crate) fn handle_command(&mut self, cmd: ControlCommand) {
        let now = Utc::now();
        match cmd {
            ControlCommand::Enable => self.enable(now),
            ControlCommand::Disable => self.disable(now),
        }
    }
}
