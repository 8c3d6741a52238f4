use dashmap::DashMap;

/// User id -> the conversation they currently have open.
#[derive(Debug, Default)]
pub struct ActiveViewTracker {
    views: DashMap<String, String>,
}

impl ActiveViewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, user_id: &str, conversation_id: &str) {
        self.views
            .insert(user_id.to_string(), conversation_id.to_string());
    }

    /// With `Some(conversation_id)`, only clears when it is still the current
    /// view, so a late leave cannot clobber a conversation opened since.
    pub fn clear(&self, user_id: &str, conversation_id: Option<&str>) -> bool {
        match conversation_id {
            Some(expected) => self
                .views
                .remove_if(user_id, |_, current| current == expected)
                .is_some(),
            None => self.views.remove(user_id).is_some(),
        }
    }

    pub fn is_active(&self, user_id: &str, conversation_id: &str) -> bool {
        self.views
            .get(user_id)
            .map(|current| current.as_str() == conversation_id)
            .unwrap_or(false)
    }

    pub fn current(&self, user_id: &str) -> Option<String> {
        self.views.get(user_id).map(|c| c.clone())
    }
}
