pub mod bytes_ext;
pub mod descriptor;
pub mod types;

#[cfg(test)]
mod tests {
    use crate::descriptor::{BaseType, FieldType, MethodType, ObjectType};
    use anyhow::Result;

    #[test]
    fn it_parses_simple_descriptors() -> Result<()> {
        let descriptor = FieldType::parse("Z".to_string())?;
        let descriptor = descriptor.into_base().unwrap();

        assert!(descriptor.is_boolean());

        Ok(())
    }

    #[test]
    fn it_parses_array_descriptors() -> Result<()> {
        let descriptor = FieldType::parse("[D".to_string())?;
        let descriptor = descriptor.into_array().unwrap();

        let element = descriptor.field_type;
        let element = element.into_base().unwrap();

        assert!(element.is_double());

        Ok(())
    }

    #[test]
    fn it_parses_class_descriptors() -> Result<()> {
        let descriptor = FieldType::parse("Ljava/lang/Object;".to_string())?;
        let descriptor = descriptor.into_object().unwrap();

        assert_eq!(descriptor.class_name, "java/lang/Object");

        Ok(())
    }

    #[test]
    fn it_parses_method_descriptors() -> Result<()> {
        let descriptor = MethodType::parse("(IDLjava/lang/Thread;)Ljava/lang/Object;".to_string())?;
        assert_eq!(
            descriptor.parameters,
            vec![
                FieldType::Base(BaseType::Int),
                FieldType::Base(BaseType::Double),
                FieldType::Object(ObjectType {
                    class_name: "java/lang/Thread".to_string()
                })
            ]
        );

        assert_eq!(
            descriptor.return_type,
            FieldType::Object(ObjectType {
                class_name: "java/lang/Object".to_string()
            })
        );

        Ok(())
    }

    #[test]
    fn it_unparses_method_descriptors() -> Result<()> {
        let descriptor = MethodType::parse("(IDLjava/lang/Thread;)Ljava/lang/Object;".to_string())?;
        let unparsed = descriptor.to_string();

        assert_eq!(unparsed, "(IDLjava/lang/Thread;)Ljava/lang/Object;");

        Ok(())
    }

    #[test]
    fn it_counts_parameter_slots() -> Result<()> {
        let descriptor = MethodType::parse("(IJLjava/lang/String;D)V".to_string())?;
        // int (1) + long (2) + reference (1) + double (2)
        assert_eq!(descriptor.parameter_slots(), 6);

        Ok(())
    }

    #[test]
    fn it_reports_widths() -> Result<()> {
        assert_eq!(FieldType::parse("J".to_string())?.width(), 2);
        assert_eq!(FieldType::parse("D".to_string())?.width(), 2);
        assert_eq!(FieldType::parse("I".to_string())?.width(), 1);
        assert_eq!(FieldType::parse("[J".to_string())?.width(), 1);

        Ok(())
    }

    #[test]
    fn it_exposes_the_return_character() -> Result<()> {
        let descriptor = MethodType::parse("()Ljava/lang/Object;".to_string())?;
        assert_eq!(descriptor.return_char(), 'L');

        let descriptor = MethodType::parse("(I)J".to_string())?;
        assert_eq!(descriptor.return_char(), 'J');

        Ok(())
    }
}
