// Run with: cargo fuzz run fuzz_create_user_fields
// A command either validates or reports at least one violation, never both.
#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use signup::domain::{CreateUser, map_new_user, validate};

#[derive(Arbitrary, Debug)]
struct Input {
    first_name: String,
    last_name: String,
    email: String,
}

fuzz_target!(|input: Input| {
    let command = CreateUser::new(input.first_name, input.last_name, input.email);
    match validate(&command) {
        Ok(valid) => {
            let user = map_new_user(&valid);
            assert_eq!(user.first_name, command.first_name);
            assert_eq!(user.last_name, command.last_name);
            assert_eq!(user.email, command.email);
        }
        Err(errors) => assert!(!errors.violations().is_empty()),
    }
});
