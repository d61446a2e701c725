use codec::MessageType;

/// The state-machine transition table of spec section 4.6: for a handful of
/// message types, the receiving connection's `last_sent` must equal a
/// specific prior value or the message is rejected with `INVALID_STATE`.
///
/// Message types absent from this table are either the first message of a
/// brand-new role (no existing record to check against — `attach`/`ann`/
/// `connect` create one) or terminal failure/application traffic the table
/// does not gate at all.
pub fn required_previous(received: MessageType) -> Option<MessageType> {
    use MessageType::*;
    Some(match received {
        ConnGenInnAvail => ConnInnGenAnn,
        ConnAnnInnSuccess | ConnAnnInnFail => ConnInnAnnHandoff,
        ConnInnAnnHandoff => ConnGenInnAvail,
        ConnExtAnnAccept | ConnExtAnnDecline => ConnAnnExtOffer,
        ConnNbrAnnConnected | ConnNbrAnnDisconnected => ConnAnnNbrConnect,
        ConnNbrAnnIdentified => ConnAnnNbrIdentify,
        ConnInnGenCleanup => ConnGenInnAvail,
        ConnExtNbrAccept | ConnExtNbrDecline => ConnNbrExtOffer,
        ConnAnnNbrIdentify => ConnNbrAnnConnected,
        ConnAnnExtOffer => ConnExtInnAttach,
        ConnNbrExtOffer | ConnNbrExtIdentify | ConnAnnExtSuccess | ConnAnnExtFail => {
            ConnExtAnnAccept
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_law_every_entry_has_a_required_previous() {
        assert_eq!(required_previous(MessageType::ConnGenInnAvail), Some(MessageType::ConnInnGenAnn));
        assert_eq!(required_previous(MessageType::ConnInnAnnHandoff), Some(MessageType::ConnGenInnAvail));
    }

    #[test]
    fn first_contact_messages_are_ungated() {
        assert_eq!(required_previous(MessageType::ConnExtInnAttach), None);
        assert_eq!(required_previous(MessageType::ConnInnGenAnn), None);
        assert_eq!(required_previous(MessageType::ConnAnnNbrConnect), None);
    }
}
