//! Sea-ORM entities for tripmate-store

pub mod conversation_participants;
pub mod conversations;
pub mod exchange_rates;
pub mod messages;

pub use conversation_participants::Entity as ConversationParticipant;
pub use conversations::Entity as Conversation;
pub use exchange_rates::Entity as ExchangeRate;
pub use messages::Entity as Message;
