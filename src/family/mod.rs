pub mod member;

pub use member::{
    FamilyData, FamilyInput, FamilyMember, MemberColor, MemberInput, ValidationError,
};
