use agri_chat_client::ConversationId;

/// Which conversation the message log belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    #[default]
    Unbound,
    /// First send of a conversation the server has not named yet.
    PendingNew,
    Bound(ConversationId),
}

impl IdentityState {
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::Bound(id) => Some(id),
            Self::Unbound | Self::PendingNew => None,
        }
    }

    /// Applies one transition deterministically.
    pub fn apply(&self, transition: IdentityTransition) -> IdentityTransitionResult {
        match transition {
            IdentityTransition::Navigate(Some(id)) => Ok(Self::Bound(id)),
            IdentityTransition::Navigate(None) | IdentityTransition::NewConversation => {
                Ok(Self::Unbound)
            }
            IdentityTransition::SendIssued => Ok(self.apply_send_issued()),
            IdentityTransition::Assigned(id) => self.apply_assigned(id),
            IdentityTransition::SendAbandoned => Ok(self.apply_send_abandoned()),
        }
    }

    fn apply_send_issued(&self) -> Self {
        match self {
            Self::Unbound | Self::PendingNew => Self::PendingNew,
            // Sends against a bound conversation never re-create it.
            Self::Bound(id) => Self::Bound(id.clone()),
        }
    }

    fn apply_assigned(&self, id: ConversationId) -> IdentityTransitionResult {
        match self {
            Self::PendingNew => Ok(Self::Bound(id)),
            Self::Bound(bound) if *bound == id => Ok(self.clone()),
            Self::Bound(bound) => Err(IdentityRejection::AlreadyBound {
                bound: bound.clone(),
                attempted: id,
            }),
            Self::Unbound => Err(IdentityRejection::NoPendingSend { attempted: id }),
        }
    }

    fn apply_send_abandoned(&self) -> Self {
        match self {
            Self::PendingNew => Self::Unbound,
            Self::Unbound | Self::Bound(_) => self.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityTransition {
    /// The external navigation hint changed.
    Navigate(Option<ConversationId>),
    SendIssued,
    /// Stream metadata revealed the server-assigned id.
    Assigned(ConversationId),
    /// A send ended without the server naming a conversation.
    SendAbandoned,
    NewConversation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRejection {
    AlreadyBound {
        bound: ConversationId,
        attempted: ConversationId,
    },
    NoPendingSend {
        attempted: ConversationId,
    },
}

pub type IdentityTransitionResult = Result<IdentityState, IdentityRejection>;

/// Identity holder; rejected transitions leave the state untouched.
#[derive(Debug, Default)]
pub struct ConversationIdentity {
    state: IdentityState,
}

impl ConversationIdentity {
    pub fn state(&self) -> &IdentityState {
        &self.state
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.state.conversation_id()
    }

    pub fn apply(&mut self, transition: IdentityTransition) -> IdentityTransitionResult {
        let next = self.state.apply(transition)?;
        self.state = next.clone();
        Ok(next)
    }
}
