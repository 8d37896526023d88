//! Per-UE procedure state machine
//!
//! Every SimUe holds an explicit [`ProcedureState`]; each inbound event maps
//! through [`transition`] to a list of actions and the next state. Events
//! that are not valid in the current state are rejected with
//! [`Error::InvalidTransition`] instead of being silently misrouted.

use ransim_common::events::{NasBuildKind, NasOutcome, ProcedureType, SimUeEvent};
use ransim_common::Error;

/// Where a UE stands in its current procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcedureState {
    /// No registration, no procedure running
    #[default]
    Idle,
    /// Registration request built/sent
    RegInitiated,
    /// Authentication challenge answered
    Authenticating,
    /// Security mode complete built/sent
    SecuringContext,
    /// Registration accept processed, complete pending
    RegAccepted,
    /// Registered, between procedures
    Registered,
    /// PDU session establishment running
    SessionEstablishing,
    /// User-data generation running
    DataTransfer,
    /// PDU session release running
    SessionReleasing,
    /// Deregistration (either direction) running
    Deregistering,
    /// Service request running
    ServiceRequesting,
    /// AN release running
    AnReleasing,
}

/// What the coordinator must do for a transition. Payloads stay with the
/// event; actions only name the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Ask RealUe to build a NAS message
    BuildNas(NasBuildKind),
    /// Ask RealUe to build a release request for the first active session
    BuildSessionRelease,
    /// Route the encoded NAS as an Initial UE Message (connecting first)
    SendInitialNas,
    /// Route the encoded NAS as Uplink NAS Transport
    SendUplinkNas,
    /// Route the encoded release complete through the gNB release path
    SendReleaseComplete,
    /// Forward the downlink NAS PDU to RealUe
    ForwardNasToUe,
    /// Forward the data-bearer setup request to RealUe
    ForwardBearerSetupToUe,
    /// Relay the UE's data-bearer result to the gNB
    RelayBearerResultToGnb,
    /// Ask RealUe to generate user data
    GeneratePackets,
    /// Ask the gNB to request an AN release
    TriggerAnRelease,
    /// Tell RealUe the signalling connection is gone
    NotifyUeConnectionRelease,
    /// Drop the gNB channel and join the gNB actor
    DetachGnb,
    /// Report PASS for the running procedure
    ReportPass,
    /// Report FAIL for the running procedure
    ReportFail,
}

/// Computes the actions and next state for an event.
pub fn transition(
    state: ProcedureState,
    event: &SimUeEvent,
) -> Result<(Vec<Action>, ProcedureState), Error> {
    use Action::*;
    use ProcedureState::*;

    // Events whose handling does not depend on the procedure position.
    match event {
        SimUeEvent::DownlinkNas { .. } => return Ok((vec![ForwardNasToUe], state)),
        SimUeEvent::DataBearerSetupRequest { .. } => {
            return Ok((vec![ForwardBearerSetupToUe], state))
        }
        SimUeEvent::UeError { .. } => return Ok((vec![ReportFail], fail_fallback(state))),
        SimUeEvent::ConnectionReleased => {
            let mut actions = vec![DetachGnb, NotifyUeConnectionRelease];
            let next = match state {
                AnReleasing => {
                    actions.push(ReportPass);
                    Registered
                }
                Deregistering | Idle => Idle,
                other => other,
            };
            return Ok((actions, next));
        }
        _ => {}
    }

    let step = match (state, event) {
        // ------------------------------------------------------------------
        // Procedure starts
        // ------------------------------------------------------------------
        (Idle, SimUeEvent::Procedure(ProcedureType::Registration)) => {
            (vec![BuildNas(NasBuildKind::RegistrationRequest)], RegInitiated)
        }
        (Idle | Registered, SimUeEvent::Procedure(ProcedureType::Deregistration)) => (
            vec![BuildNas(NasBuildKind::DeregistrationRequest)],
            Deregistering,
        ),
        (Registered, SimUeEvent::Procedure(ProcedureType::PduSessionEstablishment)) => (
            vec![BuildNas(NasBuildKind::PduSessionEstablishmentRequest)],
            SessionEstablishing,
        ),
        (Registered, SimUeEvent::Procedure(ProcedureType::UserDataTransfer)) => {
            (vec![GeneratePackets], DataTransfer)
        }
        (Registered, SimUeEvent::Procedure(ProcedureType::PduSessionRelease)) => {
            (vec![BuildSessionRelease], SessionReleasing)
        }
        (Registered, SimUeEvent::Procedure(ProcedureType::AnRelease)) => {
            (vec![TriggerAnRelease], AnReleasing)
        }
        (Registered, SimUeEvent::Procedure(ProcedureType::ServiceRequest)) => {
            (vec![BuildNas(NasBuildKind::ServiceRequest)], ServiceRequesting)
        }

        // ------------------------------------------------------------------
        // Encoded NAS routing
        // ------------------------------------------------------------------
        (
            RegInitiated,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::RegistrationRequest,
                ..
            },
        ) => (vec![SendInitialNas], RegInitiated),
        (
            ServiceRequesting,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::ServiceRequest,
                ..
            },
        ) => (vec![SendInitialNas], ServiceRequesting),
        (
            Authenticating,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::AuthenticationResponse,
                ..
            },
        ) => (vec![SendUplinkNas], Authenticating),
        (
            SecuringContext,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::SecurityModeComplete,
                ..
            },
        ) => (vec![SendUplinkNas], SecuringContext),
        (
            RegAccepted,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::RegistrationComplete,
                ..
            },
        ) => (vec![SendUplinkNas, ReportPass], Registered),
        (
            Deregistering,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::DeregistrationRequest | NasBuildKind::DeregistrationAccept,
                ..
            },
        ) => (vec![SendUplinkNas], Deregistering),
        (
            SessionEstablishing,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::PduSessionEstablishmentRequest,
                ..
            },
        ) => (vec![SendUplinkNas], SessionEstablishing),
        (
            SessionReleasing,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::PduSessionReleaseRequest { .. },
                ..
            },
        ) => (vec![SendUplinkNas], SessionReleasing),
        (
            SessionReleasing,
            SimUeEvent::NasEncoded {
                kind: NasBuildKind::PduSessionReleaseComplete { .. },
                ..
            },
        ) => (vec![SendReleaseComplete], SessionReleasing),

        // ------------------------------------------------------------------
        // Decoded NAS outcomes
        // ------------------------------------------------------------------
        (RegInitiated, SimUeEvent::Nas(NasOutcome::AuthenticationRequested)) => (
            vec![BuildNas(NasBuildKind::AuthenticationResponse)],
            Authenticating,
        ),
        (Authenticating, SimUeEvent::Nas(NasOutcome::SecurityModeCommanded)) => (
            vec![BuildNas(NasBuildKind::SecurityModeComplete)],
            SecuringContext,
        ),
        (SecuringContext, SimUeEvent::Nas(NasOutcome::RegistrationAccepted { .. })) => (
            vec![BuildNas(NasBuildKind::RegistrationComplete)],
            RegAccepted,
        ),
        (ServiceRequesting, SimUeEvent::Nas(NasOutcome::ServiceAccepted)) => {
            (vec![ReportPass], Registered)
        }
        (SessionEstablishing, SimUeEvent::Nas(NasOutcome::PduSessionEstablished { .. })) => {
            (vec![], SessionEstablishing)
        }
        (SessionEstablishing, SimUeEvent::Nas(NasOutcome::PduSessionRejected { .. })) => {
            (vec![ReportFail], Registered)
        }
        (SessionReleasing, SimUeEvent::Nas(NasOutcome::PduSessionReleaseCommanded { psi })) => (
            vec![BuildNas(NasBuildKind::PduSessionReleaseComplete { psi: *psi })],
            SessionReleasing,
        ),
        // The accept can arrive after the network already dropped the UE
        // context (the release command races the RealUe decode path), so
        // Idle accepts it too.
        (Deregistering | Idle, SimUeEvent::Nas(NasOutcome::DeregistrationAccepted)) => {
            (vec![ReportPass], Idle)
        }
        (
            Registered | SessionEstablishing | DataTransfer,
            SimUeEvent::Nas(NasOutcome::DeregistrationRequested),
        ) => (
            vec![BuildNas(NasBuildKind::DeregistrationAccept)],
            Deregistering,
        ),

        // ------------------------------------------------------------------
        // Data bearers and user data
        // ------------------------------------------------------------------
        (SessionEstablishing, SimUeEvent::DataBearerSetupResult { .. }) => {
            (vec![RelayBearerResultToGnb, ReportPass], Registered)
        }
        (_, SimUeEvent::DataBearerSetupResult { .. }) => (vec![RelayBearerResultToGnb], state),
        (DataTransfer, SimUeEvent::DataResult { success: true, .. }) => {
            (vec![ReportPass], Registered)
        }
        (DataTransfer, SimUeEvent::DataResult { success: false, .. }) => {
            (vec![ReportFail], Registered)
        }
        (SessionReleasing, SimUeEvent::DataBearerRelease { .. }) => (vec![ReportPass], Registered),

        (state, event) => {
            return Err(Error::InvalidTransition(format!(
                "event {event:?} not valid in state {state:?}"
            )))
        }
    };
    Ok(step)
}

/// The stable state a UE falls back to when a procedure fails.
fn fail_fallback(state: ProcedureState) -> ProcedureState {
    use ProcedureState::*;
    match state {
        Registered | SessionEstablishing | DataTransfer | SessionReleasing | ServiceRequesting
        | AnReleasing | Deregistering => Registered,
        _ => Idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_registration_flow_transitions() {
        let (actions, state) = transition(
            ProcedureState::Idle,
            &SimUeEvent::Procedure(ProcedureType::Registration),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![Action::BuildNas(NasBuildKind::RegistrationRequest)]
        );
        assert_eq!(state, ProcedureState::RegInitiated);

        let (actions, state) = transition(
            state,
            &SimUeEvent::NasEncoded {
                kind: NasBuildKind::RegistrationRequest,
                pdu: Bytes::new(),
            },
        )
        .unwrap();
        assert_eq!(actions, vec![Action::SendInitialNas]);

        let (_, state) =
            transition(state, &SimUeEvent::Nas(NasOutcome::AuthenticationRequested)).unwrap();
        assert_eq!(state, ProcedureState::Authenticating);

        let (_, state) =
            transition(state, &SimUeEvent::Nas(NasOutcome::SecurityModeCommanded)).unwrap();
        assert_eq!(state, ProcedureState::SecuringContext);

        let (_, state) = transition(
            state,
            &SimUeEvent::Nas(NasOutcome::RegistrationAccepted { guti: None }),
        )
        .unwrap();
        assert_eq!(state, ProcedureState::RegAccepted);

        let (actions, state) = transition(
            state,
            &SimUeEvent::NasEncoded {
                kind: NasBuildKind::RegistrationComplete,
                pdu: Bytes::new(),
            },
        )
        .unwrap();
        assert_eq!(actions, vec![Action::SendUplinkNas, Action::ReportPass]);
        assert_eq!(state, ProcedureState::Registered);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        // A PDU session procedure cannot start before registration.
        let result = transition(
            ProcedureState::Idle,
            &SimUeEvent::Procedure(ProcedureType::PduSessionEstablishment),
        );
        assert!(matches!(result, Err(Error::InvalidTransition(_))));

        // An authentication outcome out of the blue is rejected too.
        let result = transition(
            ProcedureState::Registered,
            &SimUeEvent::Nas(NasOutcome::AuthenticationRequested),
        );
        assert!(matches!(result, Err(Error::InvalidTransition(_))));
    }

    #[test]
    fn test_downlink_nas_is_forwarded_in_any_state() {
        for state in [
            ProcedureState::RegInitiated,
            ProcedureState::Authenticating,
            ProcedureState::SessionEstablishing,
            ProcedureState::Deregistering,
        ] {
            let (actions, next) = transition(
                state,
                &SimUeEvent::DownlinkNas {
                    pdu: Bytes::from_static(&[0x7e]),
                },
            )
            .unwrap();
            assert_eq!(actions, vec![Action::ForwardNasToUe]);
            assert_eq!(next, state);
        }
    }

    #[test]
    fn test_ue_error_fails_procedure_and_falls_back() {
        let (actions, next) = transition(
            ProcedureState::SessionEstablishing,
            &SimUeEvent::UeError {
                reason: "x".into(),
            },
        )
        .unwrap();
        assert_eq!(actions, vec![Action::ReportFail]);
        assert_eq!(next, ProcedureState::Registered);

        let (_, next) = transition(
            ProcedureState::RegInitiated,
            &SimUeEvent::UeError {
                reason: "x".into(),
            },
        )
        .unwrap();
        assert_eq!(next, ProcedureState::Idle);
    }

    #[test]
    fn test_an_release_flow() {
        let (actions, state) = transition(
            ProcedureState::Registered,
            &SimUeEvent::Procedure(ProcedureType::AnRelease),
        )
        .unwrap();
        assert_eq!(actions, vec![Action::TriggerAnRelease]);

        let (actions, state) = transition(state, &SimUeEvent::ConnectionReleased).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::DetachGnb,
                Action::NotifyUeConnectionRelease,
                Action::ReportPass
            ]
        );
        assert_eq!(state, ProcedureState::Registered);
    }

    #[test]
    fn test_release_flow_reports_pass_on_bearer_release() {
        let (_, state) = transition(
            ProcedureState::Registered,
            &SimUeEvent::Procedure(ProcedureType::PduSessionRelease),
        )
        .unwrap();
        assert_eq!(state, ProcedureState::SessionReleasing);

        let (actions, state) = transition(
            state,
            &SimUeEvent::Nas(NasOutcome::PduSessionReleaseCommanded { psi: 5 }),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![Action::BuildNas(NasBuildKind::PduSessionReleaseComplete {
                psi: 5
            })]
        );

        let (actions, state) = transition(state, &SimUeEvent::DataBearerRelease { psi: 5 }).unwrap();
        assert_eq!(actions, vec![Action::ReportPass]);
        assert_eq!(state, ProcedureState::Registered);
    }
}
