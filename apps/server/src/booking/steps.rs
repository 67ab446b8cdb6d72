//! Step Controller: the wizard's finite-state machine.
//!
//! [`transition`] is pure. It never touches the store; it tells the caller
//! which store side effect to run via [`Effect`]. An event that is not valid
//! in the current state yields `None` and must be treated as a no-op.

use serde::{Deserialize, Serialize};

use crate::booking::store::BookingSelection;
use crate::models::{Appointment, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub enum Step {
    Service = 1,
    Professional = 2,
    DateTime = 3,
    Confirm = 4,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::Service,
        Step::Professional,
        Step::DateTime,
        Step::Confirm,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Service => "Servicio",
            Step::Professional => "Profesional",
            Step::DateTime => "Fecha y Hora",
            Step::Confirm => "Confirmar",
        }
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> u8 {
        step.number()
    }
}

/// A single appointment's booking group, shown by the edit-scope prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditGroup {
    /// Ascending by start; `services[i]` belongs to `appointments[i]`.
    pub appointments: Vec<Appointment>,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "group", rename_all = "snake_case")]
pub enum Prompt {
    AddAnotherService,
    EditScope(EditGroup),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptAnswer {
    Accept,
    Decline,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditScopeChoice {
    JustThis,
    WholeGroup,
    Cancel,
}

/// Entry-point options that shape the flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryFlags {
    /// Promotion/voucher quick-book: go straight past the professional step.
    pub skip_professional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardState {
    pub step: Step,
    pub prompt: Option<Prompt>,
}

impl WizardState {
    fn at(step: Step) -> Self {
        Self { step, prompt: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    /// A service was picked on the service step.
    ServiceAdded,
    ServiceRemoved,
    AddServicePrompt(PromptAnswer),
    /// Includes "any professional".
    ProfessionalChosen,
    SlotChosen,
    ChangeTime,
    Abandon,
    JumpTo(Step),
    EditScope(EditScopeChoice),
    /// The whole-group store update landed.
    GroupEditLoaded,
    Confirm,
    /// Persistence succeeded.
    Booked,
}

/// Store-side work the caller must perform for a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ClearServices,
    SetupGroupEdit(EditGroup),
    /// Reset the selection and start again at the service step.
    StartOver,
    /// Reset the selection and leave the wizard.
    Exit,
    Persist,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: WizardState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn to(state: WizardState) -> Self {
        Self {
            state,
            effect: None,
        }
    }

    fn with(state: WizardState, effect: Effect) -> Self {
        Self {
            state,
            effect: Some(effect),
        }
    }
}

/// Where a freshly opened wizard starts.
///
/// `edit_group` is the sibling group of a single edited appointment, when it
/// has one; it triggers the edit-scope prompt.
pub fn initial_state(
    selection: &BookingSelection,
    edit_group: Option<EditGroup>,
    flags: EntryFlags,
) -> WizardState {
    if selection.is_group_edit() {
        return WizardState::at(Step::DateTime);
    }
    if selection.is_edit() {
        return match edit_group {
            Some(group) if group.appointments.len() > 1 => WizardState {
                step: Step::DateTime,
                prompt: Some(Prompt::EditScope(group)),
            },
            _ => WizardState::at(Step::DateTime),
        };
    }
    if selection.services.is_empty() {
        WizardState::at(Step::Service)
    } else {
        WizardState::at(after_services(flags))
    }
}

fn after_services(flags: EntryFlags) -> Step {
    if flags.skip_professional {
        Step::DateTime
    } else {
        Step::Professional
    }
}

fn leave(selection: &BookingSelection) -> Transition {
    let effect = if selection.is_edit() {
        Effect::Exit
    } else {
        Effect::StartOver
    };
    Transition::with(WizardState::at(Step::Service), effect)
}

/// Apply `event` to `state`. `selection` is the store content before the
/// event's own write.
pub fn transition(
    state: &WizardState,
    selection: &BookingSelection,
    flags: EntryFlags,
    event: WizardEvent,
) -> Option<Transition> {
    use WizardEvent as E;

    if let Some(prompt) = &state.prompt {
        return match (prompt, event) {
            (Prompt::AddAnotherService, E::AddServicePrompt(answer)) => Some(match answer {
                PromptAnswer::Accept => Transition::to(WizardState::at(Step::Service)),
                PromptAnswer::Decline => Transition::to(WizardState::at(after_services(flags))),
                PromptAnswer::Cancel => {
                    Transition::with(WizardState::at(Step::Service), Effect::ClearServices)
                }
            }),
            (Prompt::EditScope(group), E::EditScope(choice)) => Some(match choice {
                EditScopeChoice::JustThis => Transition::to(WizardState::at(Step::DateTime)),
                // The prompt stays up until the group is loaded.
                EditScopeChoice::WholeGroup => {
                    Transition::with(state.clone(), Effect::SetupGroupEdit(group.clone()))
                }
                EditScopeChoice::Cancel => {
                    Transition::with(WizardState::at(Step::Service), Effect::Exit)
                }
            }),
            (Prompt::EditScope(_), E::GroupEditLoaded) => {
                Some(Transition::to(WizardState::at(Step::DateTime)))
            }
            (_, E::Abandon) => Some(leave(selection)),
            _ => None,
        };
    }

    match (state.step, event) {
        (Step::Service, E::ServiceAdded) => Some(Transition::to(WizardState {
            step: Step::Service,
            prompt: Some(Prompt::AddAnotherService),
        })),
        (Step::Service, E::ServiceRemoved) => Some(Transition::to(state.clone())),
        (Step::Professional, E::ProfessionalChosen) => {
            Some(Transition::to(WizardState::at(Step::DateTime)))
        }
        (Step::DateTime, E::SlotChosen) => Some(Transition::to(WizardState::at(Step::Confirm))),
        (Step::Confirm, E::ChangeTime) => Some(Transition::to(WizardState::at(Step::DateTime))),
        (Step::Confirm, E::Confirm) => Some(Transition::with(state.clone(), Effect::Persist)),
        (Step::Confirm, E::Booked) => Some(leave(selection)),
        (current, E::JumpTo(target)) if target < current => {
            Some(Transition::to(WizardState::at(target)))
        }
        (_, E::Abandon) => Some(leave(selection)),
        _ => None,
    }
}
