use formfor::form::FormObject;

#[derive(FormObject)]
struct Point(i64, i64);

fn main() {}
