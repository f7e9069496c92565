use formfor::form::FormObject;

#[derive(FormObject)]
enum Answer {
    Yes,
    No,
}

fn main() {}
