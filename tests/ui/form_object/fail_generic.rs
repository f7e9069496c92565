use formfor::form::FormObject;

#[derive(FormObject)]
struct Wrapper<T> {
    value: T,
}

fn main() {}
