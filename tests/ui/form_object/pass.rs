use formfor::form::FormObject;
use formfor::schema::{BoxError, Verdict};
use formfor::value::{BoundObject, Value};

fn non_empty(object: &BoundObject, name: &str) -> Result<Verdict, BoxError> {
    let filled = object.get(name).is_some_and(Value::is_truthy);
    Ok(if filled { Verdict::Valid } else { Verdict::from("required") })
}

#[derive(Clone, Debug, PartialEq, FormObject)]
struct Address {
    #[form(kind = "text", validate = non_empty)]
    street: String,
}

#[derive(Clone, Debug, PartialEq, FormObject)]
#[form(kind = "Signup")]
struct SignupForm {
    #[form(kind = "email", label = "E-mail", rename = "emailAddress")]
    email: String,
    #[form(kind = "checkbox")]
    agree: bool,
    #[form(kind = "address")]
    address: Address,
    #[form(skip)]
    attempts: u32,
}

fn main() {
    let form = SignupForm {
        email: "a@example.com".to_string(),
        agree: true,
        address: Address {
            street: "Main".to_string(),
        },
        attempts: 3,
    };

    let object = form.to_object();
    assert_eq!(object.kind_name(), "Signup");
    assert_eq!(object.get("emailAddress"), Some(&Value::from("a@example.com")));
    assert!(object.get("attempts").is_none());

    let schema = SignupForm::schema();
    let email = schema.get("emailAddress").expect("renamed property");
    assert_eq!(email.kind.as_deref(), Some("email"));
    assert_eq!(email.hints.get("label"), Some(&Value::from("E-mail")));
    assert!(Address::schema().get("street").and_then(|p| p.error.as_ref()).is_some());

    let decoded = SignupForm::from_object(&object).expect("round trip");
    assert_eq!(decoded.email, form.email);
    assert_eq!(decoded.address, form.address);
    assert_eq!(decoded.attempts, 0);
}
